//! Brute-force in-process store with the same contract as the Lance one.
//! Useful for tests and small corpora that do not need persistence.
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use ragdb_core::error::{Error, Result};
use ragdb_core::traits::VectorStore;
use ragdb_core::types::{assign_ranks, matches_filters, Meta, SearchResult, SearchType, VectorRecord};

pub struct MemoryVectorStore {
	dim: usize,
	rows: RwLock<BTreeMap<String, VectorRecord>>,
}

impl MemoryVectorStore {
	pub fn new(dim: usize) -> Self {
		Self { dim, rows: RwLock::new(BTreeMap::new()) }
	}

	pub fn clear(&self) -> usize {
		let mut rows = self.rows.write();
		let n = rows.len();
		rows.clear();
		n
	}
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
	let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
	let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
	let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
	if na == 0.0 || nb == 0.0 {
		return 0.0;
	}
	dot / (na * nb)
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
	fn dimensions(&self) -> usize {
		self.dim
	}

	async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize> {
		for r in &records {
			if r.id.trim().is_empty() {
				return Err(Error::validation("record id is empty"));
			}
			if r.embedding.len() != self.dim {
				return Err(Error::validation_for(
					&r.id,
					format!("embedding has {} dimensions, store expects {}", r.embedding.len(), self.dim),
				));
			}
			if r.embedding.iter().any(|x| !x.is_finite()) {
				return Err(Error::validation_for(&r.id, "embedding contains non-finite values"));
			}
		}
		let now = Utc::now().timestamp_millis();
		let mut rows = self.rows.write();
		let n = records.len();
		for mut r in records {
			r.created_at = rows.get(&r.id).and_then(|old| old.created_at).or(r.created_at).or(Some(now));
			r.updated_at = Some(now);
			rows.insert(r.id.clone(), r);
		}
		Ok(n)
	}

	async fn similarity_search(
		&self,
		query: &[f32],
		limit: usize,
		filters: Option<&Meta>,
		threshold: f32,
	) -> Result<Vec<SearchResult>> {
		if query.len() != self.dim {
			return Err(Error::validation(format!("query has {} dimensions, store expects {}", query.len(), self.dim)));
		}
		let rows = self.rows.read();
		let mut results: Vec<SearchResult> = rows
			.values()
			.filter(|r| filters.map_or(true, |f| matches_filters(&r.metadata, f)))
			.map(|r| (r, cosine_similarity(query, &r.embedding)))
			.filter(|(_, sim)| *sim >= threshold)
			.map(|(r, sim)| SearchResult {
				id: r.id.clone(),
				text: r.text.clone(),
				score: sim,
				metadata: r.metadata.clone(),
				rank: 0,
				search_type: SearchType::Semantic,
			})
			.collect();
		results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
		results.truncate(limit);
		assign_ranks(&mut results);
		Ok(results)
	}

	async fn delete(&self, ids: &[String]) -> Result<usize> {
		let mut rows = self.rows.write();
		Ok(ids.iter().filter(|id| rows.remove(id.as_str()).is_some()).count())
	}

	async fn get(&self, id: &str) -> Result<Option<VectorRecord>> {
		Ok(self.rows.read().get(id).cloned())
	}

	async fn search_by_metadata(&self, filters: &Meta, limit: usize) -> Result<Vec<VectorRecord>> {
		Ok(self.rows.read().values().filter(|r| matches_filters(&r.metadata, filters)).take(limit).cloned().collect())
	}

	async fn scan(&self) -> Result<Vec<VectorRecord>> {
		Ok(self.rows.read().values().cloned().collect())
	}

	async fn count(&self) -> Result<usize> {
		Ok(self.rows.read().len())
	}

	async fn health(&self) -> bool {
		true
	}
}
