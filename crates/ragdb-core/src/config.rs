//! Configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (nested keys separated by `__`). Exposes the typed `[retrieval]` table and
//! helpers to expand `~` and `${VAR}` in data paths.
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::ModelDescriptor;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.retrieval()?.validate()?;
        Ok(config)
    }

    /// Build from an inline TOML document; environment variables are ignored.
    pub fn from_toml_str(toml: &str) -> Self {
        Self { figment: Figment::new().merge(Toml::string(toml)) }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }

    /// The `[retrieval]` table, or defaults when it is absent.
    pub fn retrieval(&self) -> Result<RetrievalConfig> {
        if self.figment.find_value("retrieval").is_err() {
            return Ok(RetrievalConfig::default());
        }
        self.get("retrieval")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub provider: String,
    pub dimensions: usize,
    pub max_tokens: usize,
    #[serde(default)]
    pub priority: Option<u32>,
}

/// Tunables for chunking, embedding and search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub chunk_max_tokens: usize,
    pub chunk_min_tokens: usize,
    pub chunk_overlap_ratio: f32,
    pub max_document_bytes: usize,
    pub cache_size: usize,
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub retry_backoff_base_seconds: f64,
    pub provider_timeout_seconds: f64,
    pub store_timeout_seconds: f64,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    pub similarity_threshold: f32,
    pub default_model: String,
    pub ollama_url: String,
    pub table_name: String,
    pub event_buffer: usize,
    pub models: BTreeMap<String, ModelEntry>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_max_tokens: 512,
            chunk_min_tokens: 16,
            chunk_overlap_ratio: 0.1,
            max_document_bytes: 1024 * 1024,
            cache_size: 10_000,
            max_concurrent: 8,
            max_retries: 3,
            retry_backoff_base_seconds: 1.0,
            provider_timeout_seconds: 30.0,
            store_timeout_seconds: 30.0,
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            similarity_threshold: 0.0,
            default_model: "embeddinggemma:latest".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            table_name: "chunks".to_string(),
            event_buffer: 32,
            models: BTreeMap::new(),
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cache_size == 0 {
            return Err(Error::Capacity("cache_size must be positive".into()));
        }
        if self.max_concurrent == 0 {
            return Err(Error::Capacity("max_concurrent must be positive".into()));
        }
        if self.event_buffer == 0 {
            return Err(Error::Capacity("event_buffer must be positive".into()));
        }
        if self.chunk_max_tokens == 0 || self.chunk_min_tokens > self.chunk_max_tokens {
            return Err(Error::InvalidConfig(format!(
                "chunk token bounds out of order: min={} max={}",
                self.chunk_min_tokens, self.chunk_max_tokens
            )));
        }
        if !(0.0..1.0).contains(&self.chunk_overlap_ratio) {
            return Err(Error::InvalidConfig(format!(
                "chunk_overlap_ratio must be in [0, 1), got {}",
                self.chunk_overlap_ratio
            )));
        }
        validate_weights(self.semantic_weight, self.keyword_weight)?;
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(Error::InvalidConfig(format!(
                "similarity_threshold must be in [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.retry_backoff_base_seconds < 0.0 || self.provider_timeout_seconds <= 0.0 || self.store_timeout_seconds <= 0.0 {
            return Err(Error::InvalidConfig("timeouts must be positive and backoff non-negative".into()));
        }
        for (name, entry) in &self.models {
            if entry.dimensions == 0 {
                return Err(Error::InvalidConfig(format!("model '{name}' declares zero dimensions")));
            }
        }
        Ok(())
    }

    /// Registry entries declared under `[retrieval.models]`.
    pub fn model_descriptors(&self) -> Vec<ModelDescriptor> {
        self.models
            .iter()
            .map(|(name, e)| ModelDescriptor {
                name: name.clone(),
                provider_id: e.provider.clone(),
                dimensions: e.dimensions,
                max_tokens: e.max_tokens,
                priority: e.priority.unwrap_or(10),
            })
            .collect()
    }
}

pub fn validate_weights(semantic: f32, keyword: f32) -> Result<()> {
    if !semantic.is_finite() || !keyword.is_finite() || semantic < 0.0 || keyword < 0.0 {
        return Err(Error::InvalidConfig(format!(
            "fusion weights must be non-negative, got semantic={semantic} keyword={keyword}"
        )));
    }
    if semantic + keyword <= 0.0 {
        return Err(Error::InvalidConfig("at least one fusion weight must be positive".into()));
    }
    Ok(())
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
