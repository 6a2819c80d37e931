//! Boundary-aware document chunking.
//!
//! Lines accumulate in a buffer. For languages with boundary patterns a
//! function/class/import line closes the current chunk and opens a new one.
//! Independently, a buffer that outgrows `max_chunk_size` is flushed early as
//! `code_block` pieces and a few trailing lines are carried into the next
//! buffer so context survives the seam.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::error::{Error, Result};
use crate::language::{detect_language, BoundaryKind, Language, LanguageTable};
use crate::types::{Chunk, ChunkMetadata, ChunkType, Document};

pub const CHARS_PER_TOKEN: usize = 4;
const AVG_LINE_CHARS: f32 = 40.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Upper bound on chunk length in bytes. A single longer line is the only exception.
    pub max_chunk_size: usize,
    /// A preamble shorter than this (text before the first boundary) is kept
    /// at the front of the first section instead of becoming its own chunk.
    pub min_chunk_size: usize,
    /// Lines carried across a size split.
    pub overlap_size: usize,
    pub max_document_bytes: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self { max_chunk_size: 1000, min_chunk_size: 0, overlap_size: 3, max_document_bytes: 1024 * 1024 }
    }
}

impl ChunkConfig {
    pub fn from_retrieval(cfg: &RetrievalConfig) -> Self {
        let max_chunk_size = cfg.chunk_max_tokens * CHARS_PER_TOKEN;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let overlap_size = (max_chunk_size as f32 * cfg.chunk_overlap_ratio / AVG_LINE_CHARS).round() as usize;
        Self {
            max_chunk_size,
            min_chunk_size: cfg.chunk_min_tokens * CHARS_PER_TOKEN,
            overlap_size,
            max_document_bytes: cfg.max_document_bytes,
        }
    }
}

/// Boundary counts for a whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOutline {
    pub language: String,
    pub lines: usize,
    pub functions: usize,
    pub classes: usize,
    pub imports: usize,
}

#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    no: usize,
    text: &'a str,
}

fn joined_len(lines: &[Line<'_>]) -> usize {
    lines.iter().map(|l| l.text.len()).sum::<usize>() + lines.len().saturating_sub(1)
}

fn indent_of(text: &str) -> usize {
    text.len() - text.trim_start().len()
}

/// Running state of one structured pass.
struct Section {
    kind: ChunkType,
    name: Option<String>,
    parent_class: Option<String>,
}

pub struct ChunkEngine {
    config: ChunkConfig,
    languages: LanguageTable,
    branch_re: Regex,
}

impl ChunkEngine {
    pub fn new(config: ChunkConfig) -> Result<Self> {
        if config.max_chunk_size == 0 {
            return Err(Error::InvalidConfig("max_chunk_size must be positive".into()));
        }
        let branch_re = Regex::new(r"\b(?:if|elif|for|while|case|catch|except|match)\b|&&|\|\|")
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Ok(Self { config, languages: LanguageTable::new()?, branch_re })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    pub fn supported_languages(&self) -> Vec<Language> {
        Language::ALL.to_vec()
    }

    pub fn detect_language(&self, document: &Document) -> Language {
        detect_language(&document.file_path, document.language.as_deref(), &document.content)
    }

    pub fn validate(&self, document: &Document) -> Result<()> {
        if document.id.trim().is_empty() {
            return Err(Error::validation("document id is empty"));
        }
        if document.content.trim().is_empty() {
            return Err(Error::validation_for(&document.id, "document content is empty"));
        }
        if document.content.len() > self.config.max_document_bytes {
            return Err(Error::validation_for(
                &document.id,
                format!(
                    "document is {} bytes, limit is {}",
                    document.content.len(),
                    self.config.max_document_bytes
                ),
            ));
        }
        Ok(())
    }

    /// Split `document` into ordered chunks.
    pub fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        self.validate(document)?;
        let language = self.detect_language(document);
        let lines: Vec<Line<'_>> =
            document.content.lines().enumerate().map(|(i, text)| Line { no: i + 1, text }).collect();
        let mut out = Emitter::new(self, document, language);
        if self.languages.has_patterns(language) {
            self.chunk_structured(&lines, language, &mut out);
        } else {
            self.chunk_unstructured(&lines, &mut out);
        }
        debug!(document = %document.id, %language, chunks = out.chunks.len(), "chunked document");
        Ok(out.chunks)
    }

    /// Counts of boundaries found in `document`, without chunking it.
    pub fn extract_metadata(&self, document: &Document) -> DocumentOutline {
        let language = self.detect_language(document);
        let mut outline = DocumentOutline { language: language.to_string(), ..DocumentOutline::default() };
        for line in document.content.lines() {
            outline.lines += 1;
            match self.languages.boundary(language, line).map(|b| b.kind) {
                Some(BoundaryKind::Function) => outline.functions += 1,
                Some(BoundaryKind::Class) => outline.classes += 1,
                Some(BoundaryKind::Import) => outline.imports += 1,
                None => {}
            }
        }
        outline
    }

    fn chunk_structured<'a>(&self, lines: &[Line<'a>], language: Language, out: &mut Emitter<'_>) {
        let mut buffer: Vec<Line<'a>> = Vec::new();
        let mut fresh = 0usize;
        let mut section = Section { kind: ChunkType::Generic, name: None, parent_class: None };
        let mut open_class: Option<(String, usize)> = None;

        for &line in lines {
            if let Some(boundary) = self.languages.boundary(language, line.text) {
                let continues_imports = boundary.kind == BoundaryKind::Import && section.kind == ChunkType::Import;
                if !continues_imports {
                    let short_preamble = section.kind == ChunkType::Generic
                        && fresh > 0
                        && joined_len(&buffer) < self.config.min_chunk_size;
                    if short_preamble {
                        debug!(lines = buffer.len(), "attaching short preamble to next section");
                    } else {
                        if fresh > 0 {
                            out.emit(&buffer, section.kind, &section);
                        }
                        buffer.clear();
                        fresh = 0;
                    }
                    let indent = indent_of(line.text);
                    if open_class.as_ref().is_some_and(|(_, class_indent)| indent <= *class_indent) {
                        open_class = None;
                    }
                    section = match boundary.kind {
                        BoundaryKind::Function => Section {
                            kind: ChunkType::Function,
                            parent_class: open_class.as_ref().map(|(name, _)| name.clone()),
                            name: boundary.name,
                        },
                        BoundaryKind::Class => {
                            open_class = boundary.name.clone().map(|n| (n, indent));
                            Section { kind: ChunkType::Class, name: boundary.name, parent_class: None }
                        }
                        BoundaryKind::Import => Section { kind: ChunkType::Import, name: None, parent_class: None },
                    };
                }
            }

            buffer.push(line);
            fresh += 1;
            if joined_len(&buffer) > self.config.max_chunk_size && buffer.len() > 1 {
                buffer = self.flush_oversized(buffer, &section, out);
                fresh = 1;
            }
        }
        if fresh > 0 {
            out.emit(&buffer, section.kind, &section);
        }
    }

    fn chunk_unstructured<'a>(&self, lines: &[Line<'a>], out: &mut Emitter<'_>) {
        let section = Section { kind: ChunkType::Generic, name: None, parent_class: None };
        let mut buffer: Vec<Line<'a>> = Vec::new();
        let mut fresh = 0usize;
        for &line in lines {
            buffer.push(line);
            fresh += 1;
            if joined_len(&buffer) > self.config.max_chunk_size && buffer.len() > 1 {
                buffer = self.flush_oversized(buffer, &section, out);
                fresh = 1;
            }
        }
        if fresh > 0 {
            out.emit(&buffer, section.kind, &section);
        }
    }

    /// Emit everything but the newest line as `code_block` pieces and return
    /// the next buffer: carried overlap followed by that line.
    fn flush_oversized<'a>(&self, mut buffer: Vec<Line<'a>>, section: &Section, out: &mut Emitter<'_>) -> Vec<Line<'a>> {
        let Some(last) = buffer.pop() else { return buffer };
        let pieces = self.split_lines(&buffer);
        for piece in &pieces {
            out.emit(piece, ChunkType::CodeBlock, section);
        }
        let mut next = self.overlap_tail(pieces.last().map_or(&[][..], Vec::as_slice), last.text.len());
        next.push(last);
        next
    }

    /// Greedy split of `lines` into pieces within `max_chunk_size`, each piece
    /// seeded with the overlap tail of the one before it.
    fn split_lines<'a>(&self, lines: &[Line<'a>]) -> Vec<Vec<Line<'a>>> {
        let mut pieces = Vec::new();
        let mut current: Vec<Line<'a>> = Vec::new();
        let mut fresh = 0usize;
        for &line in lines {
            current.push(line);
            fresh += 1;
            if joined_len(&current) > self.config.max_chunk_size && current.len() > 1 {
                let Some(overflow) = current.pop() else { continue };
                let next = {
                    let mut tail = self.overlap_tail(&current, overflow.text.len());
                    tail.push(overflow);
                    tail
                };
                pieces.push(std::mem::replace(&mut current, next));
                fresh = 1;
            }
        }
        if fresh > 0 {
            pieces.push(current);
        }
        pieces
    }

    /// Up to `overlap_size` trailing lines that still leave room for `incoming`
    /// bytes and never take more than half a chunk.
    fn overlap_tail<'a>(&self, lines: &[Line<'a>], incoming: usize) -> Vec<Line<'a>> {
        let max = self.config.max_chunk_size;
        let take = self.config.overlap_size.min(lines.len());
        let mut tail: Vec<Line<'a>> = lines[lines.len() - take..].to_vec();
        while !tail.is_empty() {
            let len = joined_len(&tail);
            if len + 1 + incoming <= max && len <= max / 2 {
                break;
            }
            tail.remove(0);
        }
        tail
    }

    fn complexity(&self, content: &str) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let branches = self.branch_re.find_iter(content).count() as f32;
        1.0 + branches
    }
}

struct Emitter<'e> {
    engine: &'e ChunkEngine,
    document: &'e Document,
    language: Language,
    chunks: Vec<Chunk>,
}

impl<'e> Emitter<'e> {
    fn new(engine: &'e ChunkEngine, document: &'e Document, language: Language) -> Self {
        Self { engine, document, language, chunks: Vec::new() }
    }

    fn emit(&mut self, lines: &[Line<'_>], kind: ChunkType, section: &Section) {
        let (Some(first), Some(last)) = (lines.first(), lines.last()) else { return };
        let content = lines.iter().map(|l| l.text).collect::<Vec<_>>().join("\n");
        if content.trim().is_empty() {
            return;
        }
        // A function chunk names itself as parent_function; code blocks split
        // out of it inherit the same name.
        let parent_function = match section.kind {
            ChunkType::Function => section.name.clone(),
            _ => None,
        };
        let parent_class = match section.kind {
            ChunkType::Function => section.parent_class.clone(),
            ChunkType::Class => section.name.clone(),
            _ => None,
        };
        let ordinal = self.chunks.len();
        self.chunks.push(Chunk {
            id: Chunk::chunk_id(&self.document.id, ordinal),
            document_id: self.document.id.clone(),
            ordinal,
            start_line: first.no,
            end_line: last.no,
            chunk_type: kind,
            metadata: ChunkMetadata {
                file_path: self.document.file_path.clone(),
                language: self.language.to_string(),
                parent_function,
                parent_class,
                complexity_score: self.engine.complexity(&content),
            },
            content,
        });
    }
}

/// Per-language chunk counts accumulated by callers that chunk many documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStats {
    pub documents_processed: u64,
    pub chunks_created: u64,
    pub processing_errors: u64,
    pub languages_detected: BTreeMap<String, u64>,
}

impl ChunkStats {
    pub fn record(&mut self, chunks: &[Chunk]) {
        self.documents_processed += 1;
        self.chunks_created += chunks.len() as u64;
        if let Some(first) = chunks.first() {
            *self.languages_detected.entry(first.metadata.language.clone()).or_default() += 1;
        }
    }

    pub fn record_error(&mut self) {
        self.processing_errors += 1;
    }
}
