//! Embedding generation: an LRU-cached, concurrency-limited manager in front
//! of pluggable providers, plus the model registry it resolves names against.

pub mod cache;
pub mod manager;
pub mod providers;
pub mod registry;

pub use cache::{CacheStats, EmbeddingCache};
pub use manager::{BatchEmbedding, BatchFailure, Embedding, EmbeddingManager, EmbeddingSettings, EmbeddingStats};
pub use providers::{HashingProvider, OllamaProvider};
pub use registry::{builtin_models, ModelRegistry};

use std::sync::Arc;

use ragdb_core::config::RetrievalConfig;
use ragdb_core::traits::EmbeddingProvider;

/// Provider selected from the environment: `APP_USE_FAKE_EMBEDDINGS=1` gives
/// the offline [`HashingProvider`] sized for the best registered model,
/// anything else talks to Ollama at `ollama_url`.
pub fn default_provider(cfg: &RetrievalConfig) -> ragdb_core::Result<Arc<dyn EmbeddingProvider>> {
    let fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if fake {
        let registry = ModelRegistry::from_config(cfg)?;
        let dim = registry.best("hashing").dimensions;
        return Ok(Arc::new(HashingProvider::new(dim)));
    }
    Ok(Arc::new(OllamaProvider::new(cfg.ollama_url.clone())))
}
