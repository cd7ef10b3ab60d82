//! Remote provider backed by an Ollama server's `/api/embed` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::EmbeddingProvider;
use crate::error::{NarrativeError, Result};

/// Connection settings for [`OllamaEmbeddingProvider`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaEmbeddingConfig {
    pub base_url: String,
    pub model: String,
    /// Vector length reported by the model.
    pub dimension: usize,
}

impl Default for OllamaEmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 768,
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embeddings from a local or remote Ollama server.
///
/// Timeouts are enforced by the caller (the index wraps every call).
pub struct OllamaEmbeddingProvider {
    client: Client,
    config: OllamaEmbeddingConfig,
    model_id: String,
}

impl OllamaEmbeddingProvider {
    pub fn new(config: OllamaEmbeddingConfig) -> Self {
        Self {
            client: Client::new(),
            model_id: format!("ollama:{}", config.model),
            config,
        }
    }

    async fn call_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.config.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| NarrativeError::Embedding(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NarrativeError::Embedding(format!("{}: {}", status, body)));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| NarrativeError::Embedding(format!("unreadable response: {}", e)))?;
        if parsed.embeddings.len() != texts.len() {
            return Err(NarrativeError::Embedding(format!(
                "{} embeddings returned for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            )));
        }

        debug!(model = %self.config.model, texts = texts.len(), "ollama embed batch");
        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.call_embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| NarrativeError::Embedding("empty response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.call_embed(texts).await
    }
}
