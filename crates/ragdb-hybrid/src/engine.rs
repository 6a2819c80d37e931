//! Orchestrates chunking, embedding, the vector store and the keyword index.
//!
//! Lifecycle: `Uninitialized -> Healthy <-> Degraded -> Shutdown`. Searches
//! and indexing are refused until [`HybridSearchEngine::initialize`] has run
//! and after [`HybridSearchEngine::shutdown`].
//!
//! Semantic and keyword searches fail fast with an [`Error::Search`] naming
//! the failing sub-search. Hybrid search degrades instead: when exactly one
//! sub-search fails, the other one's ranking is fused alone, a warning is
//! logged and the engine is marked `Degraded`. Both failing is an error.
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use ragdb_core::chunker::{ChunkConfig, ChunkEngine, ChunkStats};
use ragdb_core::config::{validate_weights, RetrievalConfig};
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::{EmbeddingProvider, VectorStore};
use ragdb_core::types::{Document, Meta, SearchResult, SearchType, VectorRecord};
use ragdb_embed::{EmbeddingManager, EmbeddingStats};
use ragdb_text::{KeywordIndex, KeywordStats};

use crate::fusion::reciprocal_rank_fusion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
	Uninitialized,
	Healthy,
	Degraded,
	Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
	pub semantic_weight: f32,
	pub keyword_weight: f32,
	pub similarity_threshold: f32,
	pub event_buffer: usize,
}

impl Default for EngineSettings {
	fn default() -> Self {
		Self::from_retrieval(&RetrievalConfig::default())
	}
}

impl EngineSettings {
	pub fn from_retrieval(cfg: &RetrievalConfig) -> Self {
		Self {
			semantic_weight: cfg.semantic_weight,
			keyword_weight: cfg.keyword_weight,
			similarity_threshold: cfg.similarity_threshold,
			event_buffer: cfg.event_buffer,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
	pub status: EngineStatus,
	pub embedding_provider: bool,
	pub vector_store: bool,
	pub keyword_documents: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
	pub status: EngineStatus,
	pub searches: u64,
	pub semantic_searches: u64,
	pub keyword_searches: u64,
	pub hybrid_searches: u64,
	pub failed_searches: u64,
	pub degraded_hybrid_searches: u64,
	pub avg_search_ms: f64,
	pub documents_indexed: u64,
	pub chunks_indexed: u64,
	pub index_failures: u64,
	pub vector_rows: Option<usize>,
	pub keyword: KeywordStats,
	pub embeddings: EmbeddingStats,
	pub chunking: ChunkStats,
}

#[derive(Default)]
struct Counters {
	semantic: AtomicU64,
	keyword: AtomicU64,
	hybrid: AtomicU64,
	failed: AtomicU64,
	degraded: AtomicU64,
	search_ms: AtomicU64,
	documents: AtomicU64,
	chunks: AtomicU64,
	index_failures: AtomicU64,
}

pub struct HybridSearchEngine<V> {
	chunker: ChunkEngine,
	embeddings: EmbeddingManager,
	store: V,
	keyword: KeywordIndex,
	settings: EngineSettings,
	status: RwLock<EngineStatus>,
	chunk_stats: Mutex<ChunkStats>,
	counters: Counters,
}

impl<V> HybridSearchEngine<V>
where
	V: VectorStore,
{
	pub fn new(chunker: ChunkEngine, embeddings: EmbeddingManager, store: V, settings: EngineSettings) -> Result<Self> {
		validate_weights(settings.semantic_weight, settings.keyword_weight)?;
		if settings.event_buffer == 0 {
			return Err(Error::Capacity("event_buffer must be positive".into()));
		}
		let model_dims = embeddings.dimensions(None);
		if model_dims != store.dimensions() {
			return Err(Error::InvalidConfig(format!(
				"model '{}' produces {model_dims} dimensions, store holds {}",
				embeddings.get_best_model().name,
				store.dimensions()
			)));
		}
		Ok(Self {
			chunker,
			embeddings,
			store,
			keyword: KeywordIndex::new(),
			settings,
			status: RwLock::new(EngineStatus::Uninitialized),
			chunk_stats: Mutex::new(ChunkStats::default()),
			counters: Counters::default(),
		})
	}

	/// Wire every component from one validated config.
	pub fn from_config(cfg: &RetrievalConfig, provider: Arc<dyn EmbeddingProvider>, store: V) -> Result<Self> {
		cfg.validate()?;
		let chunker = ChunkEngine::new(ChunkConfig::from_retrieval(cfg))?;
		let embeddings = EmbeddingManager::from_config(provider, cfg)?;
		Self::new(chunker, embeddings, store, EngineSettings::from_retrieval(cfg))
	}

	pub fn status(&self) -> EngineStatus {
		*self.status.read()
	}

	pub fn store(&self) -> &V {
		&self.store
	}

	pub fn embeddings(&self) -> &EmbeddingManager {
		&self.embeddings
	}

	pub fn keyword_index(&self) -> &KeywordIndex {
		&self.keyword
	}

	pub fn chunker(&self) -> &ChunkEngine {
		&self.chunker
	}

	pub(crate) fn settings(&self) -> &EngineSettings {
		&self.settings
	}

	/// Rebuild the keyword index from the store and start serving. Returns
	/// the number of chunks loaded. A failed rebuild leaves the status as it
	/// was and the keyword index stale, so keyword searches fail and hybrid
	/// searches fall back to the semantic side until a rebuild succeeds.
	pub async fn initialize(&self) -> Result<usize> {
		if self.status() == EngineStatus::Shutdown {
			return Err(Error::Unavailable("engine has been shut down".into()));
		}
		let loaded = self.keyword.populate_from_store(&self.store).await?;
		*self.status.write() = EngineStatus::Healthy;
		info!(chunks = loaded, "hybrid search engine initialized");
		Ok(loaded)
	}

	pub fn shutdown(&self) {
		*self.status.write() = EngineStatus::Shutdown;
		info!("hybrid search engine shut down");
	}

	pub(crate) fn ensure_ready(&self) -> Result<()> {
		match self.status() {
			EngineStatus::Healthy | EngineStatus::Degraded => Ok(()),
			EngineStatus::Uninitialized => Err(Error::Unavailable("engine not initialized".into())),
			EngineStatus::Shutdown => Err(Error::Unavailable("engine has been shut down".into())),
		}
	}

	fn mark_degraded(&self) {
		let mut status = self.status.write();
		if *status == EngineStatus::Healthy {
			*status = EngineStatus::Degraded;
		}
	}

	fn validate_query(query: &str, limit: usize) -> Result<()> {
		if query.trim().is_empty() {
			return Err(Error::validation("query is empty"));
		}
		if limit == 0 {
			return Err(Error::validation("limit must be positive"));
		}
		Ok(())
	}

	fn record_search(&self, counter: &AtomicU64, started: Instant, result: &Result<Vec<SearchResult>>) {
		counter.fetch_add(1, Ordering::Relaxed);
		let ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
		self.counters.search_ms.fetch_add(ms, Ordering::Relaxed);
		if result.is_err() {
			self.counters.failed.fetch_add(1, Ordering::Relaxed);
		}
	}

	async fn semantic_inner(
		&self,
		query: &str,
		limit: usize,
		filters: Option<&Meta>,
		threshold: f32,
	) -> Result<Vec<SearchResult>> {
		let wrap = |source: Error| Error::Search { search_type: SearchType::Semantic, source: Box::new(source) };
		let embedding = self.embeddings.embed_text(query, None).await.map_err(wrap)?;
		self.store.similarity_search(&embedding.vector, limit, filters, threshold).await.map_err(wrap)
	}

	fn keyword_inner(&self, query: &str, limit: usize, filters: Option<&Meta>) -> Result<Vec<SearchResult>> {
		self.keyword
			.try_search(query, limit, filters)
			.map_err(|source| Error::Search { search_type: SearchType::Keyword, source: Box::new(source) })
	}

	/// Embed `query` and return the closest chunks above `threshold`
	/// (configured default when `None`).
	pub async fn semantic_search(
		&self,
		query: &str,
		limit: usize,
		filters: Option<&Meta>,
		threshold: Option<f32>,
	) -> Result<Vec<SearchResult>> {
		Self::validate_query(query, limit)?;
		self.ensure_ready()?;
		let started = Instant::now();
		let threshold = threshold.unwrap_or(self.settings.similarity_threshold);
		let result = self.semantic_inner(query, limit, filters, threshold).await;
		self.record_search(&self.counters.semantic, started, &result);
		result
	}

	pub fn keyword_search(&self, query: &str, limit: usize, filters: Option<&Meta>) -> Result<Vec<SearchResult>> {
		Self::validate_query(query, limit)?;
		self.ensure_ready()?;
		let started = Instant::now();
		let result = self.keyword_inner(query, limit, filters);
		self.record_search(&self.counters.keyword, started, &result);
		result
	}

	/// Fuse `2 * limit` candidates from each sub-search with weighted RRF.
	pub async fn hybrid_search(
		&self,
		query: &str,
		limit: usize,
		semantic_weight: f32,
		keyword_weight: f32,
		filters: Option<&Meta>,
	) -> Result<Vec<SearchResult>> {
		Self::validate_query(query, limit)?;
		validate_weights(semantic_weight, keyword_weight).map_err(|e| Error::validation(e.to_string()))?;
		self.ensure_ready()?;
		let started = Instant::now();
		let candidates = limit.saturating_mul(2);

		let (semantic, keyword) = tokio::join!(
			self.semantic_inner(query, candidates, filters, self.settings.similarity_threshold),
			async { self.keyword_inner(query, candidates, filters) },
		);
		let result = match (semantic, keyword) {
			(Ok(s), Ok(k)) => Ok(reciprocal_rank_fusion(&s, &k, semantic_weight, keyword_weight, limit)),
			(Err(e), Ok(k)) => {
				warn!(error = %e, "semantic sub-search failed, serving keyword results only");
				self.counters.degraded.fetch_add(1, Ordering::Relaxed);
				self.mark_degraded();
				Ok(reciprocal_rank_fusion(&[], &k, semantic_weight, keyword_weight, limit))
			}
			(Ok(s), Err(e)) => {
				warn!(error = %e, "keyword sub-search failed, serving semantic results only");
				self.counters.degraded.fetch_add(1, Ordering::Relaxed);
				self.mark_degraded();
				Ok(reciprocal_rank_fusion(&s, &[], semantic_weight, keyword_weight, limit))
			}
			(Err(e), Err(_)) => Err(Error::Search { search_type: SearchType::Hybrid, source: Box::new(e) }),
		};
		self.record_search(&self.counters.hybrid, started, &result);
		if let Ok(hits) = &result {
			debug!(query, hits = hits.len(), "hybrid search");
		}
		result
	}

	/// Hybrid search with the configured weights and no filters.
	pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
		self.hybrid_search(query, limit, self.settings.semantic_weight, self.settings.keyword_weight, None).await
	}

	pub async fn search_typed(
		&self,
		query: &str,
		search_type: SearchType,
		limit: usize,
		filters: Option<&Meta>,
	) -> Result<Vec<SearchResult>> {
		match search_type {
			SearchType::Semantic => self.semantic_search(query, limit, filters, None).await,
			SearchType::Keyword => self.keyword_search(query, limit, filters),
			SearchType::Hybrid => {
				self.hybrid_search(query, limit, self.settings.semantic_weight, self.settings.keyword_weight, filters)
					.await
			}
		}
	}

	/// Dispatch on a `semantic | keyword | hybrid` string.
	pub async fn search_with_filters(
		&self,
		query: &str,
		search_type: &str,
		limit: usize,
		filters: &Meta,
	) -> Result<Vec<SearchResult>> {
		let search_type = SearchType::from_str(search_type)?;
		let filters = if filters.is_empty() { None } else { Some(filters) };
		self.search_typed(query, search_type, limit, filters).await
	}

	/// Chunk, embed and store one document, replacing any chunks it had
	/// before. Returns the number of chunks written.
	pub async fn index_document(&self, document: &Document) -> Result<usize> {
		self.ensure_ready()?;
		let result = self.index_document_inner(document).await;
		match &result {
			Ok(n) => {
				self.counters.documents.fetch_add(1, Ordering::Relaxed);
				self.counters.chunks.fetch_add(*n as u64, Ordering::Relaxed);
			}
			Err(_) => {
				self.counters.index_failures.fetch_add(1, Ordering::Relaxed);
			}
		}
		result
	}

	async fn index_document_inner(&self, document: &Document) -> Result<usize> {
		let chunks = match self.chunker.chunk(document) {
			Ok(c) => c,
			Err(e) => {
				self.chunk_stats.lock().record_error();
				return Err(e);
			}
		};
		self.chunk_stats.lock().record(&chunks);

		let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
		let vectors = self.embeddings.try_embed_batch(&texts, None).await.map_err(|e| match e {
			Error::Embedding { attempts, message } => {
				Error::Embedding { attempts, message: format!("document '{}': {message}", document.id) }
			}
			other => other,
		})?;

		let records: Vec<VectorRecord> = chunks
			.iter()
			.zip(vectors)
			.map(|(c, v)| VectorRecord::new(c.id.clone(), v, c.content.clone(), c.to_meta(&document.metadata)))
			.collect();

		let fresh: BTreeSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
		let stale: Vec<String> =
			self.chunk_ids_of(&document.id).await?.into_iter().filter(|id| !fresh.contains(id.as_str())).collect();
		if !stale.is_empty() {
			self.store.delete(&stale).await?;
			for id in &stale {
				self.keyword.remove_document(id);
			}
			debug!(document = %document.id, removed = stale.len(), "dropped stale chunks");
		}

		let written = self.store.upsert(records.clone()).await?;
		for r in records {
			self.keyword.add_document(&r.id, &r.text, r.metadata)?;
		}
		debug!(document = %document.id, chunks = written, "indexed document");
		Ok(written)
	}

	async fn chunk_ids_of(&self, document_id: &str) -> Result<Vec<String>> {
		let filters = Meta::from([("document_id".to_string(), document_id.to_string())]);
		let mut ids: BTreeSet<String> =
			self.store.search_by_metadata(&filters, usize::MAX).await?.into_iter().map(|r| r.id).collect();
		ids.extend(self.keyword.ids_matching(&filters));
		Ok(ids.into_iter().collect())
	}

	/// Remove every chunk of `document_id` from both indexes. Returns the
	/// number of chunks removed.
	pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
		self.ensure_ready()?;
		let ids = self.chunk_ids_of(document_id).await?;
		if ids.is_empty() {
			return Err(Error::NotFound(document_id.to_string()));
		}
		self.store.delete(&ids).await?;
		for id in &ids {
			self.keyword.remove_document(id);
		}
		info!(document = document_id, chunks = ids.len(), "deleted document");
		Ok(ids.len())
	}

	/// Check dependencies and move between `Healthy` and `Degraded`. A
	/// shut down or uninitialized engine keeps its status.
	pub async fn health_check(&self) -> HealthReport {
		let (embedding_provider, vector_store) = tokio::join!(self.embeddings.health_check(), self.store.health());
		let mut status = self.status.write();
		if matches!(*status, EngineStatus::Healthy | EngineStatus::Degraded) {
			*status = if embedding_provider && vector_store { EngineStatus::Healthy } else { EngineStatus::Degraded };
		}
		HealthReport { status: *status, embedding_provider, vector_store, keyword_documents: self.keyword.len() }
	}

	pub async fn get_stats(&self) -> EngineStats {
		let c = &self.counters;
		let semantic = c.semantic.load(Ordering::Relaxed);
		let keyword = c.keyword.load(Ordering::Relaxed);
		let hybrid = c.hybrid.load(Ordering::Relaxed);
		let searches = semantic + keyword + hybrid;
		#[allow(clippy::cast_precision_loss)]
		let avg_search_ms =
			if searches == 0 { 0.0 } else { c.search_ms.load(Ordering::Relaxed) as f64 / searches as f64 };
		let vector_rows = match self.store.count().await {
			Ok(n) => Some(n),
			Err(e) => {
				warn!(error = %e, "could not count vector rows");
				None
			}
		};
		EngineStats {
			status: self.status(),
			searches,
			semantic_searches: semantic,
			keyword_searches: keyword,
			hybrid_searches: hybrid,
			failed_searches: c.failed.load(Ordering::Relaxed),
			degraded_hybrid_searches: c.degraded.load(Ordering::Relaxed),
			avg_search_ms,
			documents_indexed: c.documents.load(Ordering::Relaxed),
			chunks_indexed: c.chunks.load(Ordering::Relaxed),
			index_failures: c.index_failures.load(Ordering::Relaxed),
			vector_rows,
			keyword: self.keyword.stats(),
			embeddings: self.embeddings.stats(),
			chunking: self.chunk_stats.lock().clone(),
		}
	}
}
