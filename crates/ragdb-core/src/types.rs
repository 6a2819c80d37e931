//! Domain types shared by the chunker, the indexes and the search engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub type ChunkId = String;
pub type Meta = HashMap<String, String>;

/// A source document handed to the indexing pipeline.
///
/// - `id`: stable document identity (usually the relative path)
/// - `content`: full text payload, at most `max_document_bytes`
/// - `file_path`/`file_type`: origin on disk and its extension
/// - `language`: optional hint; detection falls back to it after the extension
/// - `metadata`: opaque key/value pairs copied onto every chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub file_path: String,
    pub file_type: String,
    pub language: Option<String>,
    #[serde(default)]
    pub metadata: Meta,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { id: id.into(), content: content.into(), ..Self::default() }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.file_type = path.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()).unwrap_or_default();
        self.file_path = path;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Function,
    Class,
    Import,
    Generic,
    CodeBlock,
    Text,
}

impl ChunkType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Import => "import",
            Self::Generic => "generic",
            Self::CodeBlock => "code_block",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_path: String,
    pub language: String,
    pub parent_function: Option<String>,
    pub parent_class: Option<String>,
    pub complexity_score: f32,
}

/// A bounded slice of a document; the unit of embedding and indexing.
///
/// `start_line`/`end_line` are 1-based and inclusive. Overlap lines carried
/// across a split are counted in both neighbouring chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: String,
    pub ordinal: usize,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub chunk_type: ChunkType,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn chunk_id(document_id: &str, ordinal: usize) -> ChunkId {
        format!("{document_id}_{ordinal}")
    }

    /// Flatten into the string map stored alongside vectors and postings.
    /// Document-level metadata is copied first so chunk fields win on conflict.
    pub fn to_meta(&self, document_meta: &Meta) -> Meta {
        let mut meta = document_meta.clone();
        meta.insert("document_id".into(), self.document_id.clone());
        meta.insert("file_path".into(), self.metadata.file_path.clone());
        meta.insert("language".into(), self.metadata.language.clone());
        meta.insert("chunk_type".into(), self.chunk_type.to_string());
        meta.insert("start_line".into(), self.start_line.to_string());
        meta.insert("end_line".into(), self.end_line.to_string());
        meta.insert("complexity_score".into(), format!("{:.1}", self.metadata.complexity_score));
        if let Some(f) = &self.metadata.parent_function {
            meta.insert("parent_function".into(), f.clone());
        }
        if let Some(c) = &self.metadata.parent_class {
            meta.insert("parent_class".into(), c.clone());
        }
        meta
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Semantic,
    Keyword,
    Hybrid,
}

impl SearchType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "semantic" => Ok(Self::Semantic),
            "keyword" => Ok(Self::Keyword),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(Error::validation(format!("unknown search type '{other}'"))),
        }
    }
}

/// One ranked hit. `score` is engine-specific but higher is always better;
/// `rank` is 1-based within the list it was returned in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: ChunkId,
    pub text: String,
    pub score: f32,
    pub metadata: Meta,
    pub rank: usize,
    pub search_type: SearchType,
}

/// Assign 1-based ranks in current order.
pub fn assign_ranks(results: &mut [SearchResult]) {
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }
}

/// Persisted row of the vector store. Timestamps are unix milliseconds and are
/// filled in by the store on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: ChunkId,
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: Meta,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>, text: impl Into<String>, metadata: Meta) -> Self {
        Self { id: id.into(), embedding, text: text.into(), metadata, created_at: None, updated_at: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(rename = "provider")]
    pub provider_id: String,
    pub dimensions: usize,
    pub max_tokens: usize,
    /// Lower is preferred by `get_best_model`.
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    10
}

/// True when every `filters` pair is present with an equal value in `meta`.
pub fn matches_filters(meta: &Meta, filters: &Meta) -> bool {
    filters.iter().all(|(k, v)| meta.get(k) == Some(v))
}

/// Per-dataset totals. A dataset is the set of chunks whose metadata carries
/// the same `dataset_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub dataset_id: String,
    pub documents: usize,
    pub chunks: usize,
    pub total_bytes: usize,
}
