//! Streamed bulk indexing.
//!
//! [`HybridSearchEngine::index_documents`] runs on a spawned task and reports
//! through a bounded channel, so a slow consumer holds the producer back.
//! Per document the stream carries a `progress` event followed by either a
//! `document_result` or an `error`; a single `completion` closes it. A failed
//! document never stops the ones after it.
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

use ragdb_core::error::ErrorKind;
use ragdb_core::traits::VectorStore;
use ragdb_core::types::Document;

use crate::engine::HybridSearchEngine;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexEvent {
	Progress {
		/// Documents finished before this one.
		processed: usize,
		total: usize,
		document_id: String,
	},
	DocumentResult {
		document_id: String,
		chunks: usize,
	},
	Error {
		document_id: String,
		kind: ErrorKind,
		message: String,
	},
	Completion {
		total: usize,
		succeeded: usize,
		failed: usize,
		chunks: usize,
		elapsed_ms: u64,
	},
}

impl IndexEvent {
	pub fn to_json(&self) -> String {
		serde_json::to_string(self).unwrap_or_default()
	}
}

impl<V> HybridSearchEngine<V>
where
	V: VectorStore + 'static,
{
	/// Index `documents` in order on a background task. Dropping the receiver
	/// stops the task after the document in flight.
	pub fn index_documents(self: &Arc<Self>, documents: Vec<Document>) -> mpsc::Receiver<IndexEvent> {
		let (tx, rx) = mpsc::channel(self.settings().event_buffer);
		let engine = Arc::clone(self);
		tokio::spawn(async move {
			let started = Instant::now();
			let total = documents.len();
			let (mut succeeded, mut failed, mut chunks) = (0usize, 0usize, 0usize);
			for (processed, document) in documents.into_iter().enumerate() {
				let progress = IndexEvent::Progress { processed, total, document_id: document.id.clone() };
				if tx.send(progress).await.is_err() {
					warn!(processed, total, "index event receiver dropped, stopping");
					return;
				}
				let event = match engine.index_document(&document).await {
					Ok(n) => {
						succeeded += 1;
						chunks += n;
						IndexEvent::DocumentResult { document_id: document.id, chunks: n }
					}
					Err(e) => {
						failed += 1;
						warn!(document = %document.id, error = %e, "document failed to index");
						IndexEvent::Error { document_id: document.id, kind: e.kind(), message: e.to_string() }
					}
				};
				if tx.send(event).await.is_err() {
					return;
				}
			}
			let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
			info!(total, succeeded, failed, chunks, elapsed_ms, "indexing finished");
			let _ = tx.send(IndexEvent::Completion { total, succeeded, failed, chunks, elapsed_ms }).await;
		});
		rx
	}
}
