use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use ragdb_core::error::{Error, Result};
use ragdb_core::traits::EmbeddingProvider;

/// Embeddings from a local Ollama server (`POST /api/embed`).
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaProvider {
    /// `base_url` such as `http://localhost:11434`; a trailing slash is ignored.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client: reqwest::Client::new(), base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn provider_id(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embed", self.base_url);
        let request = OllamaEmbedRequest { model, input: vec![text] };
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::TransientProvider(format!("Ollama HTTP error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::NOT_FOUND => Error::NotFound(format!("model '{model}': {body}")),
                s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                    Error::TransientProvider(format!("Ollama returned {s}: {body}"))
                }
                s => Error::validation_for(model, format!("Ollama rejected request ({s}): {body}")),
            });
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::TransientProvider(format!("Ollama JSON parse error: {e}")))?;
        let vector = parsed
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::TransientProvider("Ollama returned no embeddings".into()))?;
        debug!(model, dims = vector.len(), "ollama embedding");
        Ok(vector)
    }

    async fn health(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).timeout(Duration::from_secs(5)).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), "Ollama health check failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "Ollama unreachable");
                false
            }
        }
    }
}
