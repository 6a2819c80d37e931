//! Bounded LRU cache of embeddings keyed by `(model, text)`.

use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;

use ragdb_core::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

pub struct EmbeddingCache {
    entries: LruCache<String, Vec<f32>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Result<Self> {
        let cap = NonZeroUsize::new(capacity)
            .ok_or_else(|| Error::Capacity("embedding cache size must be positive".into()))?;
        Ok(Self { entries: LruCache::new(cap), hits: 0, misses: 0, evictions: 0 })
    }

    /// Content hash of the model name and text; the separator keeps
    /// `("a", "b:c")` and `("a:b", "c")` apart.
    pub fn key(model: &str, text: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(model.as_bytes());
        hasher.update(&[0]);
        hasher.update(text.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Look up and mark as most recently used.
    pub fn get(&mut self, key: &str) -> Option<Vec<f32>> {
        match self.entries.get(key) {
            Some(v) => {
                self.hits += 1;
                Some(v.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    pub fn put(&mut self, key: String, vector: Vec<f32>) {
        if let Some((evicted, _)) = self.entries.push(key.clone(), vector) {
            if evicted != key {
                self.evictions += 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if lookups == 0 { 0.0 } else { self.hits as f64 / lookups as f64 };
        CacheStats {
            size: self.entries.len(),
            capacity: self.entries.cap().get(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            hit_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = EmbeddingCache::new(2).unwrap();
        cache.put("A".into(), vec![1.0]);
        cache.put("B".into(), vec![2.0]);
        cache.put("C".into(), vec![3.0]);

        assert!(cache.get("A").is_none());
        assert_eq!(cache.get("B"), Some(vec![2.0]));
        assert_eq!(cache.get("C"), Some(vec![3.0]));
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn access_refreshes_recency() {
        let mut cache = EmbeddingCache::new(2).unwrap();
        cache.put("A".into(), vec![1.0]);
        cache.put("B".into(), vec![2.0]);
        assert!(cache.get("A").is_some());
        cache.put("C".into(), vec![3.0]);

        assert!(cache.contains("A"));
        assert!(!cache.contains("B"));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(EmbeddingCache::new(0).is_err());
    }

    #[test]
    fn keys_separate_model_and_text() {
        assert_ne!(EmbeddingCache::key("a", "b:c"), EmbeddingCache::key("a:b", "c"));
        assert_eq!(EmbeddingCache::key("m", "t"), EmbeddingCache::key("m", "t"));
    }
}
