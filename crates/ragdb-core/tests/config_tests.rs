use ragdb_core::chunker::ChunkConfig;
use ragdb_core::config::{expand_path, resolve_with_base, Config, RetrievalConfig};
use ragdb_core::ErrorKind;
use std::path::Path;

#[test]
fn retrieval_defaults_when_table_absent() {
    let cfg = Config::from_toml_str("[data]\nlancedb_dir = \"/tmp/x\"\n");
    let r = cfg.retrieval().expect("retrieval");
    assert_eq!(r, RetrievalConfig::default());
    let dir: String = cfg.get("data.lancedb_dir").expect("data dir");
    assert_eq!(dir, "/tmp/x");
}

#[test]
fn retrieval_overrides_and_models() {
    let cfg = Config::from_toml_str(
        r#"
[retrieval]
cache_size = 2
semantic_weight = 0.5
keyword_weight = 0.5
default_model = "tiny"

[retrieval.models.tiny]
provider = "hashing"
dimensions = 8
max_tokens = 64
"#,
    );
    let r = cfg.retrieval().expect("retrieval");
    assert_eq!(r.cache_size, 2);
    assert_eq!(r.max_concurrent, 8, "unset keys keep defaults");
    r.validate().expect("valid");
    let models = r.model_descriptors();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].name, "tiny");
    assert_eq!(models[0].provider_id, "hashing");
    assert_eq!(models[0].dimensions, 8);
}

#[test]
fn zero_capacities_are_capacity_errors() {
    let r = RetrievalConfig { cache_size: 0, ..RetrievalConfig::default() };
    assert_eq!(r.validate().unwrap_err().kind(), ErrorKind::Capacity);
    let r = RetrievalConfig { max_concurrent: 0, ..RetrievalConfig::default() };
    assert_eq!(r.validate().unwrap_err().kind(), ErrorKind::Capacity);
}

#[test]
fn negative_weights_are_rejected() {
    let r = RetrievalConfig { semantic_weight: -0.1, ..RetrievalConfig::default() };
    assert_eq!(r.validate().unwrap_err().kind(), ErrorKind::InvalidConfig);
}

#[test]
fn chunk_config_is_derived_from_token_budget() {
    let r = RetrievalConfig { chunk_max_tokens: 100, chunk_min_tokens: 5, chunk_overlap_ratio: 0.2, ..RetrievalConfig::default() };
    let c = ChunkConfig::from_retrieval(&r);
    assert_eq!(c.max_chunk_size, 400);
    assert_eq!(c.min_chunk_size, 20);
    assert_eq!(c.overlap_size, 2);
}

#[test]
fn paths_expand_and_resolve() {
    std::env::set_var("RAGDB_TEST_DIR", "/opt/data");
    assert_eq!(expand_path("${RAGDB_TEST_DIR}/lance"), Path::new("/opt/data/lance"));
    assert_eq!(resolve_with_base(Path::new("/base"), "rel/x"), Path::new("/base/rel/x"));
    assert_eq!(resolve_with_base(Path::new("/base"), "/abs"), Path::new("/abs"));
}
