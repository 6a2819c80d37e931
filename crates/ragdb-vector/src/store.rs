//! `VectorStore` over a LanceDB table.
//!
//! Rows carry the chunk text, the full metadata map as JSON, a handful of
//! promoted metadata columns (see [`PROMOTED_COLUMNS`]) and the embedding.
//! Writes go through `merge_insert` on `id`, so re-indexing is idempotent.
//! Similarity is `1 - cosine distance`; filters on promoted columns run
//! inside the scan, other keys are checked after retrieval against an
//! over-fetched candidate pool.
use arrow_array::{RecordBatch, RecordBatchIterator};
use arrow_schema::Schema;
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::arrow::SendableRecordBatchStream;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{DistanceType, Table};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use ragdb_core::config::RetrievalConfig;
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::VectorStore;
use ragdb_core::types::{assign_ranks, matches_filters, Meta, SearchResult, SearchType, VectorRecord};

use crate::convert::{batch_to_records, created_at_by_id, distances, records_to_batch};
use crate::maintenance::{self, IndexReport};
use crate::schema::{build_record_schema, is_promoted, PROMOTED_COLUMNS};
use crate::table::{ensure_table, open_db, sql_in, sql_literal};

/// Extra candidates fetched per requested result when some filters can only
/// be checked after retrieval; also the growth factor when too few survive.
const POST_FILTER_OVERFETCH: usize = 4;
const LOOKUP_BATCH: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
	pub table: String,
	pub rows: usize,
	pub dimensions: usize,
	pub distance: &'static str,
	pub indices: Vec<String>,
}

pub struct LanceVectorStore {
	table: Table,
	table_name: String,
	schema: Arc<Schema>,
	dim: usize,
	timeout: Duration,
}

impl LanceVectorStore {
	/// Open (or create) `table_name` under `uri` for `dim`-wide embeddings.
	pub async fn open(uri: &str, table_name: &str, dim: usize, timeout: Duration) -> Result<Self> {
		let width = i32::try_from(dim).map_err(|_| Error::InvalidConfig(format!("dimension {dim} too large")))?;
		if dim == 0 {
			return Err(Error::InvalidConfig("vector dimension must be positive".into()));
		}
		let conn = open_db(uri).await?;
		let schema = build_record_schema(width);
		let table = ensure_table(&conn, table_name, schema.clone()).await?;
		info!(uri, table = table_name, dim, "opened vector store");
		Ok(Self { table, table_name: table_name.to_string(), schema, dim, timeout })
	}

	pub async fn open_with_config(dir: &Path, cfg: &RetrievalConfig, dim: usize) -> Result<Self> {
		Self::open(
			&dir.to_string_lossy(),
			&cfg.table_name,
			dim,
			Duration::from_secs_f64(cfg.store_timeout_seconds.max(0.001)),
		)
		.await
	}

	pub fn table_name(&self) -> &str {
		&self.table_name
	}

	async fn timed<T, F>(&self, op: &'static str, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		match tokio::time::timeout(self.timeout, fut).await {
			Ok(result) => result,
			Err(_) => Err(Error::Store(format!("{op} timed out after {:?}", self.timeout))),
		}
	}

	fn width(&self) -> i32 {
		i32::try_from(self.dim).unwrap_or(i32::MAX)
	}

	async fn collect(stream: SendableRecordBatchStream) -> Result<Vec<VectorRecord>> {
		let batches: Vec<_> = stream.try_collect().await.map_err(Error::store)?;
		let mut out = Vec::new();
		for batch in &batches {
			out.extend(batch_to_records(batch)?);
		}
		Ok(out)
	}

	async fn query_records(&self, predicate: Option<String>, limit: Option<usize>) -> Result<Vec<VectorRecord>> {
		let mut query = self.table.query();
		if let Some(p) = predicate {
			query = query.only_if(p);
		}
		if let Some(n) = limit {
			query = query.limit(n);
		}
		let stream = query.execute().await.map_err(Error::store)?;
		Self::collect(stream).await
	}

	async fn existing_created_at(&self, ids: &[String]) -> Result<HashMap<String, i64>> {
		let mut out = HashMap::new();
		for group in ids.chunks(LOOKUP_BATCH) {
			let stream = self
				.table
				.query()
				.only_if(sql_in("id", group))
				.select(Select::columns(&["id", "created_at"]))
				.execute()
				.await
				.map_err(Error::store)?;
			let batches: Vec<_> = stream.try_collect().await.map_err(Error::store)?;
			for batch in &batches {
				out.extend(created_at_by_id(batch)?);
			}
		}
		Ok(out)
	}

	async fn nearest(&self, query: &[f32], fetch: usize, predicate: Option<String>) -> Result<Vec<RecordBatch>> {
		let mut search = self
			.table
			.vector_search(query.to_vec())
			.map_err(Error::store)?
			.distance_type(DistanceType::Cosine)
			.limit(fetch);
		if let Some(p) = predicate {
			search = search.only_if(p);
		}
		let stream = search.execute().await.map_err(Error::store)?;
		stream.try_collect::<Vec<_>>().await.map_err(Error::store)
	}

	async fn count_matching(&self, predicate: &str) -> Result<usize> {
		self.table.count_rows(Some(predicate.to_string())).await.map_err(Error::store)
	}

	fn validate(&self, record: &VectorRecord) -> Result<()> {
		if record.id.trim().is_empty() {
			return Err(Error::validation("record id is empty"));
		}
		if record.embedding.len() != self.dim {
			return Err(Error::validation_for(
				&record.id,
				format!("embedding has {} dimensions, store expects {}", record.embedding.len(), self.dim),
			));
		}
		if record.embedding.iter().any(|x| !x.is_finite()) {
			return Err(Error::validation_for(&record.id, "embedding contains non-finite values"));
		}
		Ok(())
	}

	/// Build the IVF-PQ and scalar indices. Cheap no-op for the vector part
	/// while the table is small.
	pub async fn create_index(&self) -> Result<IndexReport> {
		let rows = self.count().await?;
		maintenance::build_indices(&self.table, rows, self.dim).await
	}

	pub async fn optimize(&self) -> Result<()> {
		maintenance::optimize(&self.table).await
	}

	/// Delete every row. The table and its schema stay.
	pub async fn clear(&self) -> Result<usize> {
		let rows = self.count().await?;
		self.timed("clear", async { self.table.delete("id IS NOT NULL").await.map_err(Error::store).map(|_| ()) })
			.await?;
		info!(table = %self.table_name, rows, "cleared vector table");
		Ok(rows)
	}

	pub async fn stats(&self) -> Result<StoreStats> {
		Ok(StoreStats {
			table: self.table_name.clone(),
			rows: self.count().await?,
			dimensions: self.dim,
			distance: "cosine",
			indices: maintenance::index_names(&self.table).await?,
		})
	}
}

/// Split filters into a pushed-down SQL predicate and the remainder.
pub fn split_filters(filters: Option<&Meta>) -> (Option<String>, Meta) {
	let Some(filters) = filters else {
		return (None, Meta::new());
	};
	let mut clauses: Vec<String> = Vec::new();
	let mut rest = Meta::new();
	for (k, v) in filters {
		if is_promoted(k) {
			clauses.push(format!("{k} = {}", sql_literal(v)));
		} else {
			rest.insert(k.clone(), v.clone());
		}
	}
	clauses.sort();
	let predicate = if clauses.is_empty() { None } else { Some(clauses.join(" AND ")) };
	(predicate, rest)
}

fn by_similarity(a: &SearchResult, b: &SearchResult) -> std::cmp::Ordering {
	b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl VectorStore for LanceVectorStore {
	fn dimensions(&self) -> usize {
		self.dim
	}

	async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize> {
		if records.is_empty() {
			return Ok(0);
		}
		for r in &records {
			self.validate(r)?;
		}
		// Last write wins for ids repeated inside one batch.
		let mut by_id: HashMap<String, VectorRecord> = HashMap::with_capacity(records.len());
		for r in records {
			by_id.insert(r.id.clone(), r);
		}
		let mut records: Vec<VectorRecord> = by_id.into_values().collect();
		records.sort_by(|a, b| a.id.cmp(&b.id));

		let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
		let existing = self.timed("upsert lookup", self.existing_created_at(&ids)).await?;
		let now = Utc::now().timestamp_millis();
		for r in &mut records {
			r.created_at = existing.get(&r.id).copied().or(r.created_at).or(Some(now));
			r.updated_at = Some(now);
		}

		let batch = records_to_batch(self.schema.clone(), self.width(), &records)?;
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), self.schema.clone()));
		let written = self
			.timed("upsert", async {
				let mut mi = self.table.merge_insert(&["id"]);
				mi.when_matched_update_all(None).when_not_matched_insert_all();
				mi.execute(reader).await.map_err(Error::store)
			})
			.await?;
		debug!(
			inserted = written.num_inserted_rows,
			updated = written.num_updated_rows,
			table = %self.table_name,
			"upserted vectors"
		);
		Ok(records.len())
	}

	/// Filters on promoted columns run inside LanceDB. Any other key is
	/// checked on the candidates afterwards, and the candidate pool grows
	/// until `limit` hits survive or every row has been seen.
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
		if limit == 0 {
			return Ok(Vec::new());
		}
		let (predicate, rest) = split_filters(filters);
		let mut fetch = if rest.is_empty() { limit } else { limit.saturating_mul(POST_FILTER_OVERFETCH).max(limit + 32) };

		// Post-filtered searches widen the candidate pool until enough rows
		// survive or the table has no more to give.
		let batches = loop {
			let batches = self.timed("similarity search", self.nearest(query, fetch, predicate.clone())).await?;
			if rest.is_empty() {
				break batches;
			}
			let returned: usize = batches.iter().map(RecordBatch::num_rows).sum();
			let mut survivors = 0usize;
			for batch in &batches {
				for (record, distance) in batch_to_records(batch)?.iter().zip(distances(batch)?) {
					if 1.0 - distance >= threshold && matches_filters(&record.metadata, &rest) {
						survivors += 1;
					}
				}
			}
			if survivors >= limit || returned < fetch || fetch == usize::MAX {
				break batches;
			}
			fetch = fetch.saturating_mul(POST_FILTER_OVERFETCH);
			debug!(fetch, survivors, limit, "widening post-filtered similarity search");
		};

		let mut results = Vec::new();
		for batch in &batches {
			let records = batch_to_records(batch)?;
			for (record, distance) in records.into_iter().zip(distances(batch)?) {
				let similarity = 1.0 - distance;
				if similarity < threshold || !matches_filters(&record.metadata, &rest) {
					continue;
				}
				results.push(SearchResult {
					id: record.id,
					text: record.text,
					score: similarity,
					metadata: record.metadata,
					rank: 0,
					search_type: SearchType::Semantic,
				});
			}
		}
		results.sort_by(by_similarity);
		results.truncate(limit);
		assign_ranks(&mut results);
		debug!(hits = results.len(), limit, threshold, "similarity search");
		Ok(results)
	}

	async fn delete(&self, ids: &[String]) -> Result<usize> {
		if ids.is_empty() {
			return Ok(0);
		}
		let mut removed = 0;
		for group in ids.chunks(LOOKUP_BATCH) {
			let predicate = sql_in("id", group);
			removed += self.timed("delete", self.count_matching(&predicate)).await?;
			self.timed("delete", async { self.table.delete(&predicate).await.map_err(Error::store).map(|_| ()) })
				.await?;
		}
		debug!(requested = ids.len(), removed, "deleted vectors");
		Ok(removed)
	}

	async fn get(&self, id: &str) -> Result<Option<VectorRecord>> {
		let predicate = format!("id = {}", sql_literal(id));
		let mut rows = self.timed("get", self.query_records(Some(predicate), Some(1))).await?;
		Ok(rows.pop())
	}

	async fn search_by_metadata(&self, filters: &Meta, limit: usize) -> Result<Vec<VectorRecord>> {
		let (predicate, rest) = split_filters(Some(filters));
		// Without post-filters the scan can stop at `limit`; rows are sorted
		// by id afterwards only within what was read.
		let scan_limit = if rest.is_empty() && limit != usize::MAX { Some(limit) } else { None };
		let mut rows = self.timed("metadata search", self.query_records(predicate, scan_limit)).await?;
		rows.retain(|r| matches_filters(&r.metadata, &rest));
		rows.sort_by(|a, b| a.id.cmp(&b.id));
		rows.truncate(limit);
		Ok(rows)
	}

	async fn scan(&self) -> Result<Vec<VectorRecord>> {
		let mut rows = self.timed("scan", self.query_records(None, None)).await?;
		rows.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(rows)
	}

	async fn count(&self) -> Result<usize> {
		self.timed("count", async { self.table.count_rows(None).await.map_err(Error::store) }).await
	}

	async fn health(&self) -> bool {
		match self.count().await {
			Ok(_) => true,
			Err(e) => {
				warn!(error = %e, table = %self.table_name, "vector store unhealthy");
				false
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn promoted_filters_are_pushed_down() {
		let filters = Meta::from([
			("language".to_string(), "rust".to_string()),
			("file_path".to_string(), "src/it's.rs".to_string()),
			("owner".to_string(), "ops".to_string()),
		]);
		let (predicate, rest) = split_filters(Some(&filters));
		assert_eq!(predicate.as_deref(), Some("file_path = 'src/it''s.rs' AND language = 'rust'"));
		assert_eq!(rest.len(), 1);
		assert_eq!(rest.get("owner").map(String::as_str), Some("ops"));
		assert_eq!(PROMOTED_COLUMNS.len(), 5);
	}

	#[test]
	fn no_filters_means_no_predicate() {
		let (predicate, rest) = split_filters(None);
		assert!(predicate.is_none());
		assert!(rest.is_empty());
	}
}
