use std::time::Duration;

use ragdb_core::error::ErrorKind;
use ragdb_core::traits::VectorStore;
use ragdb_core::types::{Meta, SearchType, VectorRecord};
use ragdb_vector::{LanceVectorStore, MemoryVectorStore};

fn meta(pairs: &[(&str, &str)]) -> Meta {
    pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
}

/// Unit vector in the plane at cosine `c` from the x axis.
fn at_cosine(c: f32) -> Vec<f32> {
    vec![c, (1.0 - c * c).sqrt()]
}

async fn lance(dir: &tempfile::TempDir, dim: usize) -> LanceVectorStore {
    LanceVectorStore::open(&dir.path().to_string_lossy(), "chunks", dim, Duration::from_secs(30)).await.unwrap()
}

async fn check_similarity_threshold(store: &dyn VectorStore) {
    store
        .upsert(vec![
            VectorRecord::new("low", at_cosine(0.1), "low", Meta::new()),
            VectorRecord::new("high", at_cosine(0.9), "high", Meta::new()),
            VectorRecord::new("mid", at_cosine(0.5), "mid", Meta::new()),
        ])
        .await
        .unwrap();

    let hits = store.similarity_search(&[1.0, 0.0], 10, None, 0.3).await.unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["high", "mid"]);
    assert!((hits[0].score - 0.9).abs() < 1e-3);
    assert!((hits[1].score - 0.5).abs() < 1e-3);
    assert_eq!(hits[0].rank, 1);
    assert_eq!(hits[1].rank, 2);
    assert!(hits.iter().all(|h| h.search_type == SearchType::Semantic));

    let top = store.similarity_search(&[1.0, 0.0], 1, None, 0.0).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].id, "high");
}

async fn check_idempotent_upsert(store: &dyn VectorStore) {
    let record = VectorRecord::new("doc_0", vec![0.6, 0.8], "same text", meta(&[("language", "rust")]));
    store.upsert(vec![record.clone()]).await.unwrap();
    let first = store.get("doc_0").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    store.upsert(vec![record]).await.unwrap();
    let second = store.get("doc_0").await.unwrap().unwrap();

    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(second.id, first.id);
    assert_eq!(second.embedding, first.embedding);
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(second.metadata.get("language").map(String::as_str), Some("rust"));
}

async fn check_dimension_mismatch(store: &dyn VectorStore) {
    let err = store.upsert(vec![VectorRecord::new("bad", vec![1.0, 0.0, 0.0], "x", Meta::new())]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.offending_id(), Some("bad"));
    assert_eq!(store.count().await.unwrap(), 0);

    let err = store.similarity_search(&[1.0], 5, None, 0.0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    // One non-finite embedding rejects the whole batch.
    for bad in [f32::NAN, f32::INFINITY] {
        let err = store
            .upsert(vec![
                VectorRecord::new("ok", vec![1.0, 0.0], "fine", Meta::new()),
                VectorRecord::new("nan", vec![bad, 0.0], "broken", Meta::new()),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.offending_id(), Some("nan"));
    }
    assert_eq!(store.count().await.unwrap(), 0);
}

async fn check_filters_and_delete(store: &dyn VectorStore) {
    store
        .upsert(vec![
            VectorRecord::new(
                "a_0",
                at_cosine(0.9),
                "alpha",
                meta(&[("document_id", "a"), ("language", "rust"), ("owner", "ops"), ("dataset_id", "ds")]),
            ),
            VectorRecord::new(
                "a_1",
                at_cosine(0.8),
                "alpha two",
                meta(&[("document_id", "a"), ("language", "rust"), ("owner", "dev"), ("dataset_id", "ds")]),
            ),
            VectorRecord::new(
                "b_0",
                at_cosine(0.7),
                "beta",
                meta(&[("document_id", "b"), ("language", "python"), ("dataset_id", "ds")]),
            ),
        ])
        .await
        .unwrap();

    let rust = store.similarity_search(&[1.0, 0.0], 10, Some(&meta(&[("language", "rust")])), 0.0).await.unwrap();
    assert_eq!(rust.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["a_0", "a_1"]);

    let mixed = store
        .similarity_search(&[1.0, 0.0], 10, Some(&meta(&[("language", "rust"), ("owner", "dev")])), 0.0)
        .await
        .unwrap();
    assert_eq!(mixed.len(), 1);
    assert_eq!(mixed[0].id, "a_1");
    assert_eq!(mixed[0].rank, 1);

    let by_doc = store.search_by_metadata(&meta(&[("document_id", "a")]), 10).await.unwrap();
    assert_eq!(by_doc.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["a_0", "a_1"]);

    let stats = store.stats_for_dataset("ds").await.unwrap();
    assert_eq!(stats.documents, 2);
    assert_eq!(stats.chunks, 3);
    assert_eq!(stats.total_bytes, "alpha".len() + "alpha two".len() + "beta".len());

    let removed = store.delete(&["a_0".to_string(), "missing".to_string()]).await.unwrap();
    assert_eq!(removed, 1);
    assert!(store.get("a_0").await.unwrap().is_none());
    assert_eq!(store.count().await.unwrap(), 2);
    assert_eq!(store.scan().await.unwrap().iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["a_1", "b_0"]);
}

async fn check_post_filter_fills_limit(store: &dyn VectorStore) {
    // Forty closer rows fail the filter before any matching row is reached.
    let mut records: Vec<VectorRecord> = (0..40)
        .map(|i| VectorRecord::new(format!("dev_{i}"), at_cosine(0.95), "dev", meta(&[("owner", "dev")])))
        .collect();
    for (i, c) in [0.6f32, 0.5, 0.4].into_iter().enumerate() {
        records.push(VectorRecord::new(format!("ops_{i}"), at_cosine(c), "ops", meta(&[("owner", "ops")])));
    }
    store.upsert(records).await.unwrap();

    let filter = meta(&[("owner", "ops")]);
    let hits = store.similarity_search(&[1.0, 0.0], 3, Some(&filter), 0.0).await.unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["ops_0", "ops_1", "ops_2"]);
    assert_eq!(hits.iter().map(|h| h.rank).collect::<Vec<_>>(), vec![1, 2, 3]);

    let missing = meta(&[("owner", "nobody")]);
    assert!(store.similarity_search(&[1.0, 0.0], 3, Some(&missing), 0.0).await.unwrap().is_empty());
}

#[tokio::test]
async fn lance_similarity_respects_threshold_and_order() {
    let dir = tempfile::tempdir().unwrap();
    check_similarity_threshold(&lance(&dir, 2).await).await;
}

#[tokio::test]
async fn memory_similarity_respects_threshold_and_order() {
    check_similarity_threshold(&MemoryVectorStore::new(2)).await;
}

#[tokio::test]
async fn lance_post_filter_fills_limit() {
    let dir = tempfile::tempdir().unwrap();
    check_post_filter_fills_limit(&lance(&dir, 2).await).await;
}

#[tokio::test]
async fn memory_post_filter_fills_limit() {
    check_post_filter_fills_limit(&MemoryVectorStore::new(2)).await;
}

#[tokio::test]
async fn lance_upsert_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    check_idempotent_upsert(&lance(&dir, 2).await).await;
}

#[tokio::test]
async fn memory_upsert_is_idempotent() {
    check_idempotent_upsert(&MemoryVectorStore::new(2)).await;
}

#[tokio::test]
async fn lance_rejects_wrong_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    check_dimension_mismatch(&lance(&dir, 2).await).await;
}

#[tokio::test]
async fn memory_rejects_wrong_dimensions() {
    check_dimension_mismatch(&MemoryVectorStore::new(2)).await;
}

#[tokio::test]
async fn lance_filters_and_deletes() {
    let dir = tempfile::tempdir().unwrap();
    check_filters_and_delete(&lance(&dir, 2).await).await;
}

#[tokio::test]
async fn memory_filters_and_deletes() {
    check_filters_and_delete(&MemoryVectorStore::new(2)).await;
}

#[tokio::test]
async fn lance_rows_survive_reopen_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = lance(&dir, 2).await;
        store.upsert(vec![VectorRecord::new("keep", vec![1.0, 0.0], "kept", Meta::new())]).await.unwrap();
    }
    let store = lance(&dir, 2).await;
    assert_eq!(store.get("keep").await.unwrap().map(|r| r.text), Some("kept".to_string()));
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.rows, 1);
    assert_eq!(stats.dimensions, 2);
    assert!(store.health().await);

    assert_eq!(store.clear().await.unwrap(), 1);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn lance_reopen_with_other_dimension_fails() {
    let dir = tempfile::tempdir().unwrap();
    drop(lance(&dir, 2).await);
    let err = LanceVectorStore::open(&dir.path().to_string_lossy(), "chunks", 3, Duration::from_secs(30))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidConfig);
}

#[tokio::test]
async fn small_tables_skip_ivfpq() {
    let dir = tempfile::tempdir().unwrap();
    let store = lance(&dir, 2).await;
    store.upsert(vec![VectorRecord::new("one", vec![1.0, 0.0], "one", Meta::new())]).await.unwrap();
    let report = store.create_index().await.unwrap();
    assert!(report.vector_index.is_none());
    assert!(report.skipped_reason.is_some());
}

/// Trains IVF-PQ. Slow; run with `cargo test -p ragdb-vector -- --ignored`.
#[ignore]
#[tokio::test]
async fn ivfpq_index_builds_and_still_answers() {
    let dir = tempfile::tempdir().unwrap();
    let dim = 16;
    let store = lance(&dir, dim).await;
    let records: Vec<VectorRecord> = (0..300)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let v: Vec<f32> = (0..dim).map(|j| ((i * 31 + j * 7) % 97) as f32 / 97.0 + 0.01).collect();
            VectorRecord::new(format!("doc_{i}"), v, format!("text {i}"), meta(&[("document_id", "d")]))
        })
        .collect();
    let target = records[42].embedding.clone();
    store.upsert(records).await.unwrap();

    let report = store.create_index().await.unwrap();
    assert_eq!(report.vector_index.as_deref(), Some("vector_idx"));
    store.optimize().await.unwrap();
    assert!(store.stats().await.unwrap().indices.contains(&"vector_idx".to_string()));

    let hits = store.similarity_search(&target, 5, None, 0.0).await.unwrap();
    assert!(!hits.is_empty());
}
