use std::sync::Arc;

use ragdb_core::error::ErrorKind;
use ragdb_core::traits::EmbeddingProvider;
use ragdb_embed::{EmbeddingManager, EmbeddingSettings, HashingProvider, ModelRegistry, OllamaProvider};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[tokio::test]
async fn hashing_provider_is_deterministic_and_normalized() {
    let p = HashingProvider::new(64);
    let a = p.generate("Hello hybrid world", "any").await.unwrap();
    let b = p.generate("hello HYBRID world", "other").await.unwrap();
    assert_eq!(a.len(), 64);
    assert_eq!(a, b);
    assert!((norm(&a) - 1.0).abs() < 1e-4);
}

#[test]
fn hashing_provider_separates_unrelated_texts() {
    let p = HashingProvider::new(128);
    let q = p.embed("vector database search");
    let near = p.embed("search the vector database quickly");
    let far = p.embed("pancakes with maple syrup");
    let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
    assert!(dot(&q, &near) > dot(&q, &far));
}

#[test]
fn hashing_provider_handles_empty_text() {
    let v = HashingProvider::new(8).embed("");
    assert_eq!(v, vec![0.0; 8]);
}

#[tokio::test]
async fn ollama_returns_first_embedding() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"model": "nomic-embed-text", "input": ["hi there"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.1, 0.2, 0.3]]})))
        .expect(1)
        .mount(&server)
        .await;

    let p = OllamaProvider::new(format!("{}/", server.uri()));
    let v = p.generate("hi there", "nomic-embed-text").await.unwrap();
    assert_eq!(v, vec![0.1, 0.2, 0.3]);
}

#[tokio::test]
async fn ollama_status_codes_map_to_error_kinds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"model": "busy"})))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"model": "missing"})))
        .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"model": "empty"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": []})))
        .mount(&server)
        .await;

    let p = OllamaProvider::new(server.uri());
    let busy = p.generate("x", "busy").await.unwrap_err();
    assert_eq!(busy.kind(), ErrorKind::TransientProvider);
    assert!(busy.is_retryable());

    let missing = p.generate("x", "missing").await.unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);
    assert!(!missing.is_retryable());

    let empty = p.generate("x", "empty").await.unwrap_err();
    assert!(empty.is_retryable());
}

#[tokio::test]
async fn ollama_health_reflects_tags_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .mount(&server)
        .await;
    assert!(OllamaProvider::new(server.uri()).health().await);

    // Nothing listens on port 9 locally.
    assert!(!OllamaProvider::new("http://127.0.0.1:9").health().await);
}

#[tokio::test]
async fn manager_retries_through_ollama_outage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0, 0.0, 0.0, 0.0]]})))
        .mount(&server)
        .await;

    let registry = ModelRegistry::new(
        vec![ragdb_core::types::ModelDescriptor {
            name: "tiny".into(),
            provider_id: "ollama".into(),
            dimensions: 4,
            max_tokens: 128,
            priority: 1,
        }],
        "tiny",
    )
    .unwrap();
    let settings = EmbeddingSettings {
        backoff_base: std::time::Duration::from_millis(1),
        ..EmbeddingSettings::default()
    };
    let mgr = EmbeddingManager::new(Arc::new(OllamaProvider::new(server.uri())), registry, settings).unwrap();

    let e = mgr.embed_text("retry me", None).await.unwrap();
    assert_eq!(e.vector, vec![1.0, 0.0, 0.0, 0.0]);
    assert_eq!(mgr.stats().retries, 1);
}
