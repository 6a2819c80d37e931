use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ragdb_core::error::{Error, ErrorKind, Result};
use ragdb_core::traits::EmbeddingProvider;
use ragdb_core::types::ModelDescriptor;
use ragdb_embed::{EmbeddingManager, EmbeddingSettings, ModelRegistry};

const DIM: usize = 4;

fn registry() -> ModelRegistry {
    let m = |name: &str, priority| ModelDescriptor {
        name: name.into(),
        provider_id: "mock".into(),
        dimensions: DIM,
        max_tokens: 64,
        priority,
    };
    ModelRegistry::new(vec![m("m", 1), m("backup", 2)], "m").unwrap()
}

fn settings(max_concurrent: usize, max_retries: u32) -> EmbeddingSettings {
    EmbeddingSettings {
        cache_size: 16,
        max_concurrent,
        max_retries,
        backoff_base: Duration::from_millis(1),
        timeout: Duration::from_millis(200),
    }
}

fn vector_for(text: &str) -> Vec<f32> {
    #[allow(clippy::cast_precision_loss)]
    let n = text.len() as f32;
    vec![n, 1.0, 0.0, 0.0]
}

/// Scripted provider: per-text failure counts, per-text delays, call and
/// concurrency tracking.
#[derive(Default)]
struct MockProvider {
    transient_failures: HashMap<String, usize>,
    always_fail: Vec<String>,
    terminal: Vec<String>,
    delays_ms: HashMap<String, u64>,
    wrong_dims: bool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    seen: parking_lot::Mutex<HashMap<String, usize>>,
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    fn provider_id(&self) -> &str {
        "mock"
    }

    async fn generate(&self, text: &str, _model: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let delay = self.delays_ms.get(text).copied().unwrap_or(5);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let attempt = {
            let mut seen = self.seen.lock();
            let n = seen.entry(text.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if self.always_fail.iter().any(|t| t == text) {
            return Err(Error::TransientProvider(format!("{text} is down")));
        }
        if self.terminal.iter().any(|t| t == text) {
            return Err(Error::validation_for(text, "rejected"));
        }
        if attempt <= self.transient_failures.get(text).copied().unwrap_or(0) {
            return Err(Error::TransientProvider("flaky".into()));
        }
        if self.wrong_dims {
            return Ok(vec![1.0; DIM + 1]);
        }
        Ok(vector_for(text))
    }
}

fn manager(provider: Arc<MockProvider>, settings: EmbeddingSettings) -> EmbeddingManager {
    EmbeddingManager::new(provider, registry(), settings).unwrap()
}

#[tokio::test]
async fn second_lookup_is_served_from_cache() {
    let provider = Arc::new(MockProvider::default());
    let mgr = manager(provider.clone(), settings(2, 0));

    let first = mgr.embed_text("hello", None).await.unwrap();
    let second = mgr.embed_text("hello", None).await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.vector, second.vector);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    let stats = mgr.stats();
    assert_eq!(stats.cache.hits, 1);
    assert_eq!(stats.requests, 2);
}

#[tokio::test]
async fn cache_is_keyed_by_model() {
    let provider = Arc::new(MockProvider::default());
    let mgr = manager(provider.clone(), settings(2, 0));

    mgr.embed_text("hello", Some("m")).await.unwrap();
    let other = mgr.embed_text("hello", Some("backup")).await.unwrap();
    assert!(!other.cached);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let provider = Arc::new(MockProvider {
        transient_failures: HashMap::from([("x".to_string(), 2)]),
        ..MockProvider::default()
    });
    let mgr = manager(provider.clone(), settings(2, 3));

    let e = mgr.embed_text("x", None).await.unwrap();
    assert_eq!(e.vector, vector_for("x"));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    assert_eq!(mgr.stats().retries, 2);
}

#[tokio::test]
async fn exhausted_retries_surface_embedding_error() {
    let provider = Arc::new(MockProvider { always_fail: vec!["x".into()], ..MockProvider::default() });
    let mgr = manager(provider.clone(), settings(2, 2));

    let err = mgr.embed_text("x", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Embedding);
    assert!(matches!(err, Error::Embedding { attempts: 3, .. }));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    assert_eq!(mgr.stats().failures, 1);
}

#[tokio::test]
async fn terminal_failures_are_not_retried() {
    let provider = Arc::new(MockProvider { terminal: vec!["bad".into()], ..MockProvider::default() });
    let mgr = manager(provider.clone(), settings(2, 5));

    let err = mgr.embed_text("bad", None).await.unwrap_err();
    assert!(matches!(err, Error::Embedding { attempts: 1, .. }));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn timeouts_count_as_transient() {
    let provider = Arc::new(MockProvider {
        delays_ms: HashMap::from([("slow".to_string(), 1_000)]),
        ..MockProvider::default()
    });
    let mut s = settings(1, 1);
    s.timeout = Duration::from_millis(20);
    let mgr = manager(provider.clone(), s);

    let err = mgr.embed_text("slow", None).await.unwrap_err();
    assert!(matches!(err, Error::Embedding { attempts: 2, .. }));
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn wrong_dimensions_are_rejected() {
    let provider = Arc::new(MockProvider { wrong_dims: true, ..MockProvider::default() });
    let mgr = manager(provider, settings(1, 3));
    let err = mgr.embed_text("x", None).await.unwrap_err();
    assert!(matches!(err, Error::Embedding { attempts: 1, .. }));
}

#[tokio::test]
async fn batch_preserves_order_and_substitutes_zero_vectors() {
    // Completion order is z, y, x; output must still be x, y, z.
    let provider = Arc::new(MockProvider {
        always_fail: vec!["y".into()],
        delays_ms: HashMap::from([("x".to_string(), 60), ("y".to_string(), 30), ("zzz".to_string(), 1)]),
        ..MockProvider::default()
    });
    let mgr = manager(provider, settings(3, 1));
    let texts = vec!["x".to_string(), "y".to_string(), "zzz".to_string()];

    let out = mgr.embed_batch_detailed(&texts, None).await;
    assert_eq!(out.vectors.len(), 3);
    assert_eq!(out.vectors[0], vector_for("x"));
    assert_eq!(out.vectors[1], vec![0.0; DIM]);
    assert_eq!(out.vectors[2], vector_for("zzz"));
    assert_eq!(out.failures.len(), 1);
    assert_eq!(out.failures[0].index, 1);
    assert_eq!(mgr.stats().zero_vector_substitutions, 1);
}

#[tokio::test]
async fn provider_concurrency_is_bounded() {
    let provider = Arc::new(MockProvider::default());
    let mgr = manager(provider.clone(), settings(2, 0));
    let texts: Vec<String> = (0..10).map(|i| format!("text {i}")).collect();

    let out = mgr.embed_batch(&texts, None).await;
    assert_eq!(out.len(), 10);
    assert!(provider.peak.load(Ordering::SeqCst) <= 2, "peak {}", provider.peak.load(Ordering::SeqCst));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn long_texts_are_truncated_before_the_provider() {
    let provider = Arc::new(MockProvider::default());
    let mgr = manager(provider, settings(1, 0));
    let long = vec!["word"; 500].join(" ");
    let e = mgr.embed_text(&long, None).await.unwrap();
    // 64 tokens / 1.3 = 49 words of 4 chars + 48 spaces
    assert_eq!(e.vector[0], 49.0 * 4.0 + 48.0);
}

#[test]
fn registry_lookups() {
    let provider = Arc::new(MockProvider::default());
    let mgr = manager(provider, settings(1, 0));

    assert_eq!(mgr.get_best_model().name, "m");
    assert_eq!(mgr.get_model_info("backup").map(|d| d.dimensions), Some(DIM));
    assert!(mgr.get_model_info("nope").is_none());
    let names: Vec<String> = mgr.get_available_models().into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["m", "backup"]);
    assert_eq!(mgr.dimensions(Some("unknown")), DIM);
}

#[test]
fn zero_capacities_fail_construction() {
    let provider = Arc::new(MockProvider::default());
    let mut s = settings(1, 0);
    s.cache_size = 0;
    let err = EmbeddingManager::new(provider.clone(), registry(), s).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Capacity);

    let err = EmbeddingManager::new(provider, registry(), settings(0, 0)).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Capacity);
}

#[tokio::test]
async fn try_embed_batch_reports_the_failing_text() {
    let provider = Arc::new(MockProvider { terminal: vec!["b".into()], ..MockProvider::default() });
    let mgr = manager(provider, settings(2, 0));
    let ok = mgr.try_embed_batch(&["a".to_string(), "cc".to_string()], None).await.unwrap();
    assert_eq!(ok, vec![vector_for("a"), vector_for("cc")]);

    let err = mgr.try_embed_batch(&["a".to_string(), "b".to_string()], None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Embedding);
}
