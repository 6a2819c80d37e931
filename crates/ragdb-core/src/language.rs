//! Language detection and per-language boundary patterns.
//!
//! Boundaries are recognized line by line with regular expressions; this is a
//! heuristic, not a parser. The pattern table is built per [`LanguageTable`]
//! instance so tests and multiple configurations never share mutable state.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Cpp,
    C,
    Go,
    Rust,
    Markdown,
    Text,
}

impl Language {
    pub const ALL: [Language; 10] = [
        Self::Python,
        Self::JavaScript,
        Self::TypeScript,
        Self::Java,
        Self::Cpp,
        Self::C,
        Self::Go,
        Self::Rust,
        Self::Markdown,
        Self::Text,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::C => "c",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::Markdown => "markdown",
            Self::Text => "text",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let lang = match ext.to_ascii_lowercase().as_str() {
            "py" | "pyi" => Self::Python,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "ts" | "tsx" => Self::TypeScript,
            "java" => Self::Java,
            "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Self::Cpp,
            "c" | "h" => Self::C,
            "go" => Self::Go,
            "rs" => Self::Rust,
            "md" | "markdown" => Self::Markdown,
            "txt" | "rst" | "text" => Self::Text,
            _ => return None,
        };
        Some(lang)
    }

    /// Parse a user-supplied language name such as `"python"`, `"js"` or `"c++"`.
    pub fn from_name(name: &str) -> Option<Self> {
        let lang = match name.trim().to_ascii_lowercase().as_str() {
            "python" | "py" => Self::Python,
            "javascript" | "js" => Self::JavaScript,
            "typescript" | "ts" => Self::TypeScript,
            "java" => Self::Java,
            "cpp" | "c++" | "cxx" => Self::Cpp,
            "c" => Self::C,
            "go" | "golang" => Self::Go,
            "rust" | "rs" => Self::Rust,
            "markdown" | "md" => Self::Markdown,
            "text" | "txt" | "plain" => Self::Text,
            _ => return None,
        };
        Some(lang)
    }

    /// Content-keyword fallback used when neither extension nor hint resolve.
    pub fn from_content(content: &str) -> Self {
        if content.contains("#include") {
            Self::Cpp
        } else if content.contains("package ") && content.contains("func ") {
            Self::Go
        } else if content.contains("fn ") && content.contains("let ") {
            Self::Rust
        } else if content.contains("def ") && content.contains("import ") {
            Self::Python
        } else if content.contains("class ") && content.contains("public ") {
            Self::Java
        } else if content.contains("function") || content.contains("=>") {
            Self::JavaScript
        } else {
            Self::Text
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extension first, then the caller's hint, then content heuristics.
pub fn detect_language(file_path: &str, hint: Option<&str>, content: &str) -> Language {
    Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(Language::from_extension)
        .or_else(|| hint.and_then(Language::from_name))
        .unwrap_or_else(|| Language::from_content(content))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    Function,
    Class,
    Import,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    pub kind: BoundaryKind,
    pub name: Option<String>,
}

#[derive(Debug)]
struct BoundaryPatterns {
    function: Regex,
    class: Regex,
    import: Regex,
}

impl BoundaryPatterns {
    fn new(function: &str, class: &str, import: &str) -> Result<Self> {
        let compile = |p: &str| Regex::new(p).map_err(|e| Error::InvalidConfig(format!("bad boundary pattern {p:?}: {e}")));
        Ok(Self { function: compile(function)?, class: compile(class)?, import: compile(import)? })
    }
}

// Words a loose function pattern can capture from control flow.
const NOT_A_NAME: &[&str] = &["if", "for", "while", "switch", "return", "catch", "sizeof", "else", "new", "match"];

#[derive(Debug)]
pub struct LanguageTable {
    patterns: HashMap<Language, BoundaryPatterns>,
}

impl LanguageTable {
    pub fn new() -> Result<Self> {
        let mut patterns = HashMap::new();
        patterns.insert(
            Language::Python,
            BoundaryPatterns::new(r"^\s*(?:async\s+)?def\s+(\w+)\s*\(", r"^\s*class\s+(\w+)", r"^(?:import|from)\s+")?,
        );
        let js_function = r"(?:^|\s)(?:async\s+)?function\*?\s+(\w+)|^\s*(?:export\s+)?(?:const|let|var)?\s*(\w+)\s*[:=]\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*=>)";
        let js_class = r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(\w+)";
        let js_import = r"^\s*(?:import\s|(?:const|let|var)\s+\w+\s*=\s*require\()";
        patterns.insert(Language::JavaScript, BoundaryPatterns::new(js_function, js_class, js_import)?);
        patterns.insert(Language::TypeScript, BoundaryPatterns::new(js_function, js_class, js_import)?);
        patterns.insert(
            Language::Java,
            BoundaryPatterns::new(
                r"^\s*(?:(?:public|private|protected|static|final|abstract|synchronized)\s+)+[\w<>\[\],? ]+\s+(\w+)\s*\(",
                r"^\s*(?:public\s+)?(?:abstract\s+|final\s+)?(?:class|interface|enum)\s+(\w+)",
                r"^\s*import\s+",
            )?,
        );
        let c_function = r"^(?:[\w:<>*&]+\s+)+[*&]?(\w+)\s*\([^;]*\)\s*(?:const\s*)?\{?\s*$";
        patterns.insert(
            Language::Cpp,
            BoundaryPatterns::new(c_function, r"^\s*(?:class|struct)\s+(\w+)\s*[:{]?\s*$", r"^\s*#include\b")?,
        );
        patterns.insert(
            Language::C,
            BoundaryPatterns::new(c_function, r"^\s*(?:typedef\s+)?struct\s+(\w+)\s*\{?\s*$", r"^\s*#include\b")?,
        );
        patterns.insert(
            Language::Go,
            BoundaryPatterns::new(
                r"^func\s+(?:\([^)]*\)\s*)?(\w+)\s*[\[(]",
                r"^type\s+(\w+)\s+(?:struct|interface)\b",
                r"^import\b",
            )?,
        );
        patterns.insert(
            Language::Rust,
            BoundaryPatterns::new(
                r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+(\w+)",
                r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|impl(?:<[^>]*>)?)\s+(\w+)",
                r"^\s*(?:pub\s+)?use\s+",
            )?,
        );
        Ok(Self { patterns })
    }

    pub fn has_patterns(&self, language: Language) -> bool {
        self.patterns.contains_key(&language)
    }

    /// Languages with boundary-aware chunking, in declaration order.
    pub fn structured_languages(&self) -> Vec<Language> {
        Language::ALL.into_iter().filter(|l| self.has_patterns(*l)).collect()
    }

    /// Classify a single line. Function signatures win over classes, classes
    /// over imports.
    pub fn boundary(&self, language: Language, line: &str) -> Option<Boundary> {
        let p = self.patterns.get(&language)?;
        if let Some(caps) = p.function.captures(line) {
            let name = caps.iter().skip(1).flatten().map(|m| m.as_str().to_string()).next();
            if name.as_deref().map_or(true, |n| !NOT_A_NAME.contains(&n)) {
                return Some(Boundary { kind: BoundaryKind::Function, name });
            }
        }
        if let Some(caps) = p.class.captures(line) {
            let name = caps.get(1).map(|m| m.as_str().to_string());
            return Some(Boundary { kind: BoundaryKind::Class, name });
        }
        if p.import.is_match(line) {
            return Some(Boundary { kind: BoundaryKind::Import, name: None });
        }
        None
    }
}
