//! Embedding provider implementations.
//!
//! Providers return raw vectors for one text; caching, retries, concurrency
//! limits and timeouts live in [`EmbeddingManager`](crate::EmbeddingManager).

pub mod hashing;
pub mod ollama;

pub use hashing::HashingProvider;
pub use ollama::OllamaProvider;
