//! Turn a directory tree into [`Document`]s for indexing.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::language::Language;
use crate::types::Document;

#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    max_document_bytes: usize,
    limit: Option<usize>,
}

impl DirectoryLoader {
    pub fn new(max_document_bytes: usize) -> Self {
        Self { max_document_bytes, limit: None }
    }

    /// Stop after the first `limit` files (sorted by path).
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Files with a recognized extension under `root`, sorted.
    pub fn list_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|p| p.extension().and_then(|s| s.to_str()).and_then(Language::from_extension).is_some())
            .collect();
        files.sort();
        if let Some(limit) = self.limit {
            files.truncate(limit);
        }
        files
    }

    /// Read every supported file. Ids are paths relative to `root`; files over
    /// the size ceiling are skipped with a warning.
    pub fn load(&self, root: &Path) -> Result<Vec<Document>> {
        if !root.is_dir() {
            return Err(Error::NotFound(root.display().to_string()));
        }
        let mut documents = Vec::new();
        for path in self.list_files(root) {
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            if size > self.max_document_bytes as u64 {
                warn!(path = %path.display(), size, "skipping oversized file");
                continue;
            }
            let content = read_file_content(&path)?;
            let relative = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().replace('\\', "/");
            documents.push(Document::new(relative, content).with_path(path.to_string_lossy()));
        }
        debug!(root = %root.display(), count = documents.len(), "loaded documents");
        Ok(documents)
    }
}

fn read_file_content(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(_) => {
            let bytes = fs::read(path).map_err(|e| Error::NotFound(format!("{}: {e}", path.display())))?;
            Ok(String::from_utf8_lossy(&bytes).to_string())
        }
    }
}
