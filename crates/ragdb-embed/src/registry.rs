//! Per-instance table of embedding models.

use std::collections::BTreeMap;
use tracing::warn;

use ragdb_core::config::RetrievalConfig;
use ragdb_core::error::{Error, Result};
use ragdb_core::types::ModelDescriptor;

fn model(name: &str, provider: &str, dimensions: usize, max_tokens: usize, priority: u32) -> ModelDescriptor {
    ModelDescriptor { name: name.to_string(), provider_id: provider.to_string(), dimensions, max_tokens, priority }
}

/// Models served by a stock Ollama install.
pub fn builtin_models() -> Vec<ModelDescriptor> {
    vec![
        model("embeddinggemma:latest", "ollama", 1024, 512, 1),
        model("embeddinggemma", "ollama", 1024, 512, 1),
        model("nomic-embed-text", "ollama", 768, 512, 2),
        model("mxbai-embed-large", "ollama", 1024, 512, 2),
        model("bge-m3", "ollama", 1024, 512, 3),
        model("all-minilm", "ollama", 384, 256, 4),
    ]
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelDescriptor>,
    default_model: String,
    top: ModelDescriptor,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelDescriptor>, default_model: impl Into<String>) -> Result<Self> {
        if models.is_empty() {
            return Err(Error::InvalidConfig("model registry is empty".into()));
        }
        let mut models = models;
        models.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        let top = models[0].clone();
        let models = models.into_iter().map(|m| (m.name.clone(), m)).collect();
        Ok(Self { models, default_model: default_model.into(), top })
    }

    /// Models declared in config, or the built-in table when none are.
    pub fn from_config(cfg: &RetrievalConfig) -> Result<Self> {
        let declared = cfg.model_descriptors();
        let models = if declared.is_empty() { builtin_models() } else { declared };
        Self::new(models, cfg.default_model.clone())
    }

    pub fn get(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models.get(name)
    }

    /// Best first: ascending priority, then name.
    pub fn available(&self) -> Vec<&ModelDescriptor> {
        let mut all: Vec<&ModelDescriptor> = self.models.values().collect();
        all.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        all
    }

    /// The configured default when it is served by `provider_id`, otherwise the
    /// highest-priority model of that provider, otherwise the default or the
    /// overall best entry. Never fails: the registry is non-empty.
    pub fn best(&self, provider_id: &str) -> &ModelDescriptor {
        if let Some(d) = self.get(&self.default_model).filter(|d| d.provider_id == provider_id) {
            return d;
        }
        let ranked = self.available();
        ranked
            .iter()
            .find(|d| d.provider_id == provider_id)
            .copied()
            .or_else(|| self.get(&self.default_model))
            .unwrap_or(&self.top)
    }

    /// Look up `requested`, falling back to [`best`](Self::best) for `None`
    /// or unknown names.
    pub fn resolve(&self, requested: Option<&str>, provider_id: &str) -> &ModelDescriptor {
        match requested {
            Some(name) => match self.get(name) {
                Some(d) => d,
                None => {
                    let fallback = self.best(provider_id);
                    warn!(requested = name, fallback = %fallback.name, "unknown embedding model");
                    fallback
                }
            },
            None => self.best(provider_id),
        }
    }
}
