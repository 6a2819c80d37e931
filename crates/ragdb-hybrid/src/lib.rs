//! ragdb-hybrid
//!
//! Hybrid retrieval over a vector store and an in-memory keyword index, with
//! weighted reciprocal rank fusion and streamed bulk indexing.
pub mod engine;
pub mod fusion;
pub mod indexing;

pub use engine::{EngineSettings, EngineStats, EngineStatus, HealthReport, HybridSearchEngine};
pub use fusion::reciprocal_rank_fusion;
pub use indexing::IndexEvent;
