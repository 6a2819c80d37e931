//! Cached, rate-limited, retrying front end to an [`EmbeddingProvider`].

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use ragdb_core::config::RetrievalConfig;
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::EmbeddingProvider;
use ragdb_core::types::ModelDescriptor;

use crate::cache::{CacheStats, EmbeddingCache};
use crate::registry::ModelRegistry;

const TOKENS_PER_WORD: f64 = 1.3;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSettings {
    pub cache_size: usize,
    pub max_concurrent: usize,
    /// Extra attempts after the first failed provider call.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self::from_retrieval(&RetrievalConfig::default())
    }
}

impl EmbeddingSettings {
    pub fn from_retrieval(cfg: &RetrievalConfig) -> Self {
        Self {
            cache_size: cfg.cache_size,
            max_concurrent: cfg.max_concurrent,
            max_retries: cfg.max_retries,
            backoff_base: Duration::from_secs_f64(cfg.retry_backoff_base_seconds.max(0.0)),
            timeout: Duration::from_secs_f64(cfg.provider_timeout_seconds.max(0.001)),
        }
    }
}

/// Result of a single-text embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub cached: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub index: usize,
    pub error: String,
}

/// Batch output, aligned with the input. Failed slots hold zero vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEmbedding {
    pub vectors: Vec<Vec<f32>>,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingStats {
    pub provider: String,
    pub requests: u64,
    pub provider_calls: u64,
    pub retries: u64,
    pub failures: u64,
    pub zero_vector_substitutions: u64,
    pub avg_latency_ms: f64,
    pub cache: CacheStats,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    provider_calls: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    substitutions: AtomicU64,
    generated: AtomicU64,
    generated_ms: AtomicU64,
}

enum Attempt {
    Done(Vec<f32>),
    Retry(Error),
    Fail(Error),
}

pub struct EmbeddingManager {
    provider: Arc<dyn EmbeddingProvider>,
    registry: ModelRegistry,
    cache: Mutex<EmbeddingCache>,
    limiter: Arc<Semaphore>,
    settings: EmbeddingSettings,
    counters: Counters,
}

impl EmbeddingManager {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, registry: ModelRegistry, settings: EmbeddingSettings) -> Result<Self> {
        if settings.max_concurrent == 0 {
            return Err(Error::Capacity("max_concurrent must be positive".into()));
        }
        let cache = EmbeddingCache::new(settings.cache_size)?;
        Ok(Self {
            provider,
            registry,
            cache: Mutex::new(cache),
            limiter: Arc::new(Semaphore::new(settings.max_concurrent)),
            settings,
            counters: Counters::default(),
        })
    }

    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, cfg: &RetrievalConfig) -> Result<Self> {
        Self::new(provider, ModelRegistry::from_config(cfg)?, EmbeddingSettings::from_retrieval(cfg))
    }

    pub fn provider_id(&self) -> &str {
        self.provider.provider_id()
    }

    /// Embed one text. Cache hits return immediately; misses go to the
    /// provider under the concurrency limit and are retried with exponential
    /// backoff while the failure is transient.
    pub async fn embed_text(&self, text: &str, model: Option<&str>) -> Result<Embedding> {
        let started = Instant::now();
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        let descriptor = self.registry.resolve(model, self.provider.provider_id());
        let key = EmbeddingCache::key(&descriptor.name, text);

        if let Some(vector) = self.cache.lock().get(&key) {
            return Ok(Embedding { vector, cached: true, latency_ms: elapsed_ms(started) });
        }

        let input = truncate_to_limit(text, descriptor.max_tokens);
        let vector = match self.generate_with_retry(&input, descriptor).await {
            Ok(v) => v,
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };
        self.cache.lock().put(key, vector.clone());

        let latency_ms = elapsed_ms(started);
        self.counters.generated.fetch_add(1, Ordering::Relaxed);
        self.counters.generated_ms.fetch_add(latency_ms, Ordering::Relaxed);
        Ok(Embedding { vector, cached: false, latency_ms })
    }

    /// Embed every text, preserving input order. Never fails as a whole.
    pub async fn embed_batch(&self, texts: &[String], model: Option<&str>) -> Vec<Vec<f32>> {
        self.embed_batch_detailed(texts, model).await.vectors
    }

    /// Like [`embed_batch`](Self::embed_batch) but also reports which slots
    /// were substituted with zero vectors.
    pub async fn embed_batch_detailed(&self, texts: &[String], model: Option<&str>) -> BatchEmbedding {
        let descriptor = self.registry.resolve(model, self.provider.provider_id());
        let name = descriptor.name.as_str();
        let dims = descriptor.dimensions;

        // Provider calls are bounded by the shared limiter; join_all keeps input order.
        let mut pending = Vec::with_capacity(texts.len());
        for text in texts {
            pending.push(self.embed_text(text, Some(name)));
        }
        let results = join_all(pending).await;

        let mut vectors = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(e) => vectors.push(e.vector),
                Err(e) => {
                    warn!(index, error = %e, "embedding failed, substituting zero vector");
                    self.counters.substitutions.fetch_add(1, Ordering::Relaxed);
                    failures.push(BatchFailure { index, error: e.to_string() });
                    vectors.push(vec![0.0; dims]);
                }
            }
        }
        debug!(batch = texts.len(), failed = failures.len(), model = name, "embedded batch");
        BatchEmbedding { vectors, failures }
    }

    /// All-or-nothing batch: every text embedded in input order, or the error
    /// of the first failing slot.
    pub async fn try_embed_batch(&self, texts: &[String], model: Option<&str>) -> Result<Vec<Vec<f32>>> {
        let descriptor = self.registry.resolve(model, self.provider.provider_id());
        let name = descriptor.name.as_str();
        let mut pending = Vec::with_capacity(texts.len());
        for text in texts {
            pending.push(self.embed_text(text, Some(name)));
        }
        join_all(pending).await.into_iter().map(|r| r.map(|e| e.vector)).collect()
    }

    async fn generate_with_retry(&self, text: &str, descriptor: &ModelDescriptor) -> Result<Vec<f32>> {
        let mut attempt: u32 = 0;
        loop {
            let outcome = self.attempt(text, descriptor).await;
            attempt += 1;
            match outcome {
                Attempt::Done(vector) => return Ok(vector),
                Attempt::Fail(e) => {
                    return Err(Error::Embedding { attempts: attempt, message: e.to_string() });
                }
                Attempt::Retry(e) if attempt > self.settings.max_retries => {
                    return Err(Error::Embedding { attempts: attempt, message: e.to_string() });
                }
                Attempt::Retry(e) => {
                    let delay = self
                        .settings
                        .backoff_base
                        .checked_mul(2u32.saturating_pow(attempt - 1))
                        .map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF));
                    warn!(model = %descriptor.name, attempt, ?delay, error = %e, "embedding attempt failed, retrying");
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One provider call holding a limiter permit. The permit is released
    /// before any backoff sleep.
    async fn attempt(&self, text: &str, descriptor: &ModelDescriptor) -> Attempt {
        let Ok(_permit) = self.limiter.acquire().await else {
            return Attempt::Fail(Error::Unavailable("embedding limiter closed".into()));
        };
        self.counters.provider_calls.fetch_add(1, Ordering::Relaxed);
        let call = self.provider.generate(text, &descriptor.name);
        match tokio::time::timeout(self.settings.timeout, call).await {
            Err(_) => Attempt::Retry(Error::TransientProvider(format!(
                "provider timed out after {:?}",
                self.settings.timeout
            ))),
            Ok(Err(e)) if e.is_retryable() => Attempt::Retry(e),
            Ok(Err(e)) => Attempt::Fail(e),
            Ok(Ok(v)) if v.len() != descriptor.dimensions => Attempt::Fail(Error::validation_for(
                &descriptor.name,
                format!("provider returned {} dimensions, model declares {}", v.len(), descriptor.dimensions),
            )),
            Ok(Ok(v)) => Attempt::Done(v),
        }
    }

    pub fn get_model_info(&self, model: &str) -> Option<ModelDescriptor> {
        self.registry.get(model).cloned()
    }

    pub fn get_available_models(&self) -> Vec<ModelDescriptor> {
        self.registry.available().into_iter().cloned().collect()
    }

    pub fn get_best_model(&self) -> ModelDescriptor {
        self.registry.best(self.provider.provider_id()).clone()
    }

    /// Dimensionality of `model`, or of the best model when `None`/unknown.
    pub fn dimensions(&self, model: Option<&str>) -> usize {
        self.registry.resolve(model, self.provider.provider_id()).dimensions
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub async fn health_check(&self) -> bool {
        self.provider.health().await
    }

    pub fn stats(&self) -> EmbeddingStats {
        let generated = self.counters.generated.load(Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let avg_latency_ms = if generated == 0 {
            0.0
        } else {
            self.counters.generated_ms.load(Ordering::Relaxed) as f64 / generated as f64
        };
        EmbeddingStats {
            provider: self.provider.provider_id().to_string(),
            requests: self.counters.requests.load(Ordering::Relaxed),
            provider_calls: self.counters.provider_calls.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            zero_vector_substitutions: self.counters.substitutions.load(Ordering::Relaxed),
            avg_latency_ms,
            cache: self.cache.lock().stats(),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Keep the leading words that fit `max_tokens` at ~1.3 tokens per word.
pub fn truncate_to_limit(text: &str, max_tokens: usize) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let max_words = ((max_tokens as f64) / TOKENS_PER_WORD).floor() as usize;
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    debug!(words = words.len(), max_words, "truncating text to model limit");
    words[..max_words].join(" ")
}
