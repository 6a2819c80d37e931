//! Seams to external collaborators: the embedding provider and the
//! vector-capable store. Both are async; every call is a suspension point.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::error::Result;
use crate::types::{DatasetStats, Meta, SearchResult, VectorRecord};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier for the provider (e.g. `ollama`, `hashing`).
    fn provider_id(&self) -> &str;

    /// Embed one text with `model`. Network and timeout failures should be
    /// reported as `Error::TransientProvider` so callers can retry them.
    async fn generate(&self, text: &str, model: &str) -> Result<Vec<f32>>;

    async fn health(&self) -> bool {
        true
    }
}

/// Persistence and cosine-similarity search over [`VectorRecord`]s.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Dimensionality every stored embedding must have.
    fn dimensions(&self) -> usize;

    /// Insert or update by id in a single write. Returns the number of records written.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize>;

    /// Records with `1 - cosine_distance >= threshold`, best first, ties by id.
    async fn similarity_search(
        &self,
        query: &[f32],
        limit: usize,
        filters: Option<&Meta>,
        threshold: f32,
    ) -> Result<Vec<SearchResult>>;

    /// Returns the number of ids that existed.
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    async fn get(&self, id: &str) -> Result<Option<VectorRecord>>;

    async fn search_by_metadata(&self, filters: &Meta, limit: usize) -> Result<Vec<VectorRecord>>;

    /// Every stored record, used to rebuild the keyword index.
    async fn scan(&self) -> Result<Vec<VectorRecord>>;

    async fn count(&self) -> Result<usize>;

    async fn health(&self) -> bool;

    /// Documents, chunks and text bytes tagged with `dataset_id`.
    async fn stats_for_dataset(&self, dataset_id: &str) -> Result<DatasetStats> {
        let filters = Meta::from([("dataset_id".to_string(), dataset_id.to_string())]);
        let records = self.search_by_metadata(&filters, usize::MAX).await?;
        let documents: BTreeSet<&str> =
            records.iter().filter_map(|r| r.metadata.get("document_id").map(String::as_str)).collect();
        Ok(DatasetStats {
            dataset_id: dataset_id.to_string(),
            documents: documents.len(),
            chunks: records.len(),
            total_bytes: records.iter().map(|r| r.text.len()).sum(),
        })
    }
}
