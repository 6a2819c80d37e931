//! In-memory TF-IDF keyword index.
//!
//! Scoring: for each query token present in the index a document gains
//! `tf(token, doc) * idf(token)` with `idf = 1 + N / (1 + df)`, `N` being the
//! number of indexed documents. Ties keep insertion order.
//!
//! Removing or replacing a document purges its postings and decrements the
//! document frequency of its tokens, so removed text never influences later
//! scores.
//!
//! A failed rebuild from the vector store leaves the index stale: its old
//! contents are kept but [`KeywordIndex::try_search`] refuses to serve them
//! until a rebuild succeeds.
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tantivy::tokenizer::TextAnalyzer;
use tracing::{debug, info, warn};

use ragdb_core::error::{Error, Result};
use ragdb_core::traits::VectorStore;
use ragdb_core::types::{assign_ranks, matches_filters, Meta, SearchResult, SearchType};

use crate::analyzer::{build_analyzer, tokenize};

struct StoredDoc {
	text: String,
	metadata: Meta,
	seq: u64,
	/// Distinct tokens, kept so removal can find the postings to purge.
	tokens: Vec<String>,
}

#[derive(Default)]
struct State {
	documents: HashMap<String, StoredDoc>,
	postings: HashMap<String, HashMap<String, u32>>,
	document_frequency: HashMap<String, usize>,
	next_seq: u64,
	stale: bool,
}

impl State {
	fn insert(&mut self, analyzer: &TextAnalyzer, id: &str, text: &str, metadata: Meta) {
		let seq = match self.remove(id) {
			Some(seq) => seq,
			None => {
				self.next_seq += 1;
				self.next_seq
			}
		};
		let mut tf: HashMap<String, u32> = HashMap::new();
		for token in tokenize(analyzer, text) {
			*tf.entry(token).or_insert(0) += 1;
		}
		let mut tokens = Vec::with_capacity(tf.len());
		for (token, count) in tf {
			self.postings.entry(token.clone()).or_default().insert(id.to_string(), count);
			*self.document_frequency.entry(token.clone()).or_insert(0) += 1;
			tokens.push(token);
		}
		self.documents.insert(id.to_string(), StoredDoc { text: text.to_string(), metadata, seq, tokens });
	}

	/// Drop `id` and its postings; returns its insertion sequence.
	fn remove(&mut self, id: &str) -> Option<u64> {
		let doc = self.documents.remove(id)?;
		for token in &doc.tokens {
			if let Some(list) = self.postings.get_mut(token) {
				list.remove(id);
				if list.is_empty() {
					self.postings.remove(token);
				}
			}
			if let Some(df) = self.document_frequency.get_mut(token) {
				*df = df.saturating_sub(1);
				if *df == 0 {
					self.document_frequency.remove(token);
				}
			}
		}
		Some(doc.seq)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordStats {
	pub documents: usize,
	pub unique_tokens: usize,
	pub postings: usize,
	pub stale: bool,
}

/// Thread-safe keyword index. Reads share the lock; writes serialize.
pub struct KeywordIndex {
	analyzer: TextAnalyzer,
	state: RwLock<State>,
}

impl Default for KeywordIndex {
	fn default() -> Self {
		Self::new()
	}
}

impl KeywordIndex {
	pub fn new() -> Self {
		Self { analyzer: build_analyzer(), state: RwLock::new(State::default()) }
	}

	/// Index `text` under `id`. An existing entry for `id` is replaced.
	pub fn add_document(&self, id: &str, text: &str, metadata: Meta) -> Result<()> {
		if id.trim().is_empty() {
			return Err(Error::validation("keyword document id is empty"));
		}
		self.state.write().insert(&self.analyzer, id, text, metadata);
		Ok(())
	}

	/// Replace the text and metadata of `id`, keeping its tie-break position.
	pub fn update_document(&self, id: &str, text: &str, metadata: Meta) -> Result<()> {
		let mut state = self.state.write();
		if !state.documents.contains_key(id) {
			return Err(Error::NotFound(id.to_string()));
		}
		state.insert(&self.analyzer, id, text, metadata);
		Ok(())
	}

	/// Returns whether `id` was indexed.
	pub fn remove_document(&self, id: &str) -> bool {
		self.state.write().remove(id).is_some()
	}

	pub fn clear(&self) {
		*self.state.write() = State::default();
	}

	pub fn contains(&self, id: &str) -> bool {
		self.state.read().documents.contains_key(id)
	}

	pub fn len(&self) -> usize {
		self.state.read().documents.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Ids whose metadata matches every filter pair.
	pub fn ids_matching(&self, filters: &Meta) -> Vec<String> {
		let state = self.state.read();
		let mut ids: Vec<(u64, String)> = state
			.documents
			.iter()
			.filter(|(_, d)| matches_filters(&d.metadata, filters))
			.map(|(id, d)| (d.seq, id.clone()))
			.collect();
		ids.sort();
		ids.into_iter().map(|(_, id)| id).collect()
	}

	pub fn is_stale(&self) -> bool {
		self.state.read().stale
	}

	/// [`search`](Self::search), refused with `Unavailable` while the index is stale.
	pub fn try_search(&self, query: &str, limit: usize, filters: Option<&Meta>) -> Result<Vec<SearchResult>> {
		if self.is_stale() {
			return Err(Error::Unavailable("keyword index is stale, rebuild from the vector store".into()));
		}
		Ok(self.search(query, limit, filters))
	}

	pub fn search(&self, query: &str, limit: usize, filters: Option<&Meta>) -> Vec<SearchResult> {
		let query_tokens = tokenize(&self.analyzer, query);
		if query_tokens.is_empty() || limit == 0 {
			return Vec::new();
		}
		let state = self.state.read();
		#[allow(clippy::cast_precision_loss)]
		let n = state.documents.len() as f32;

		let mut scores: HashMap<&str, f32> = HashMap::new();
		for token in &query_tokens {
			let Some(list) = state.postings.get(token) else { continue };
			#[allow(clippy::cast_precision_loss)]
			let df = state.document_frequency.get(token).copied().unwrap_or(0) as f32;
			let idf = 1.0 + n / (1.0 + df);
			for (doc_id, tf) in list {
				#[allow(clippy::cast_precision_loss)]
				let contribution = *tf as f32 * idf;
				*scores.entry(doc_id.as_str()).or_insert(0.0) += contribution;
			}
		}

		let mut ranked: Vec<(&str, f32, &StoredDoc)> = scores
			.into_iter()
			.filter_map(|(id, score)| state.documents.get(id).map(|d| (id, score, d)))
			.filter(|(_, _, d)| filters.map_or(true, |f| matches_filters(&d.metadata, f)))
			.collect();
		ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.2.seq.cmp(&b.2.seq)));
		ranked.truncate(limit);

		let mut results: Vec<SearchResult> = ranked
			.into_iter()
			.map(|(id, score, d)| SearchResult {
				id: id.to_string(),
				text: d.text.clone(),
				score,
				metadata: d.metadata.clone(),
				rank: 0,
				search_type: SearchType::Keyword,
			})
			.collect();
		assign_ranks(&mut results);
		debug!(query, hits = results.len(), "keyword search");
		results
	}

	/// Rebuild from everything the vector store holds. The new index is built
	/// off to the side and swapped in, so concurrent searches see either the
	/// old or the new contents. A failed scan marks the index stale.
	pub async fn populate_from_store(&self, store: &dyn VectorStore) -> Result<usize> {
		let records = match store.scan().await {
			Ok(records) => records,
			Err(e) => {
				self.state.write().stale = true;
				warn!(error = %e, "keyword index rebuild failed, index marked stale");
				return Err(e);
			}
		};
		let mut fresh = State::default();
		for record in records {
			fresh.insert(&self.analyzer, &record.id, &record.text, record.metadata);
		}
		let count = fresh.documents.len();
		*self.state.write() = fresh;
		info!(documents = count, "keyword index rebuilt from vector store");
		Ok(count)
	}

	pub fn stats(&self) -> KeywordStats {
		let state = self.state.read();
		KeywordStats {
			documents: state.documents.len(),
			unique_tokens: state.postings.len(),
			postings: state.postings.values().map(HashMap::len).sum(),
			stale: state.stale,
		}
	}
}
