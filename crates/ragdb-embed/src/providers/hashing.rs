use async_trait::async_trait;
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use ragdb_core::error::Result;
use ragdb_core::traits::EmbeddingProvider;

/// Deterministic bag-of-tokens embedding. Texts sharing words land close
/// together, which is enough for offline runs and tests. Output is
/// L2-normalized; the model name is ignored.
pub struct HashingProvider {
    dim: usize,
}

impl HashingProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            #[allow(clippy::cast_possible_truncation)]
            let idx = (h as usize) % self.dim;
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            #[allow(clippy::cast_precision_loss)]
            let jitter = (i % 3) as f32 * 0.01;
            v[idx] += val + jitter;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn provider_id(&self) -> &str {
        "hashing"
    }

    async fn generate(&self, text: &str, _model: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }
}
