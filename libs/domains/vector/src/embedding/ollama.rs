use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Embedder;
use crate::error::{VectorError, VectorResult};

/// Ollama engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaConfig {
    pub model: String,
    /// Base URL, e.g. `http://localhost:11434`
    pub endpoint: String,
    /// Pull the model when the engine is prepared
    #[serde(default = "default_pull")]
    pub pull: bool,
}

fn default_pull() -> bool {
    true
}

impl OllamaConfig {
    pub fn new(model: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            endpoint: endpoint.into(),
            pull: default_pull(),
        }
    }
}

/// Embeddings served by a local Ollama instance
pub struct OllamaEmbedder {
    client: Client,
    config: OllamaConfig,
}

impl OllamaEmbedder {
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    name: &'a str,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> VectorResult<Vec<f32>> {
        let response = self
            .client
            .post(self.url("/api/embeddings"))
            .json(&EmbeddingRequest {
                model: &self.config.model,
                prompt: text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(VectorError::Embedding(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        let body: EmbeddingResponse = response.json().await?;
        debug!(model = %self.config.model, dimension = body.embedding.len(), "Embedded text");
        Ok(body.embedding)
    }

    async fn prepare(&self) -> VectorResult<()> {
        if !self.config.pull {
            return Ok(());
        }

        info!(model = %self.config.model, endpoint = %self.config.endpoint, "Pulling model");
        let response = self
            .client
            .post(self.url("/api/pull"))
            .json(&PullRequest {
                name: &self.config.model,
                stream: false,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(VectorError::Embedding(format!(
                "Model pull failed ({}): {}",
                status, error_text
            )));
        }

        // Drain the body so the pull has finished before we return.
        response.bytes().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let body = serde_json::to_value(EmbeddingRequest {
            model: "nomic-embed-text",
            prompt: "hello",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"model": "nomic-embed-text", "prompt": "hello"})
        );
    }

    #[test]
    fn test_missing_embedding_is_empty() {
        let body: EmbeddingResponse = serde_json::from_str("{}").unwrap();
        assert!(body.embedding.is_empty());
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let embedder = OllamaEmbedder::new(OllamaConfig::new("m", "http://ollama:11434/"));
        assert_eq!(
            embedder.url("/api/embeddings"),
            "http://ollama:11434/api/embeddings"
        );
    }

    #[test]
    fn test_config_pull_defaults_on() {
        let config: OllamaConfig =
            serde_json::from_str(r#"{"model": "m", "endpoint": "http://x"}"#).unwrap();
        assert!(config.pull);
    }
}
