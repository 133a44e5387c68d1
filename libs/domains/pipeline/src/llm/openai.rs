use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Completion, CompletionClient};
use crate::error::{PipelineError, PipelineResult};

/// OpenAI chat completion configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIChatConfig {
    #[serde(alias = "apikey")]
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

impl OpenAIChatConfig {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: default_base_url(),
            max_tokens: None,
        }
    }
}

pub struct OpenAIChatClient {
    client: Client,
    config: OpenAIChatConfig,
}

impl OpenAIChatClient {
    pub fn new(config: OpenAIChatConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

impl ChatResponse {
    fn into_completion(self) -> PipelineResult<Completion> {
        let text = self
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| PipelineError::InvalidData("Completion has no choices".to_string()))?;

        Ok(Completion {
            text,
            total_tokens: self.usage.total_tokens,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAIChatClient {
    async fn complete(&self, system: &str, prompt: &str) -> PipelineResult<Completion> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Completion(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = format!("OpenAI API error ({}): {}", status, error_text);
            return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                PipelineError::RateLimited(message)
            } else {
                PipelineError::Completion(message)
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Completion(e.to_string()))?;
        let completion = body.into_completion()?;

        debug!(model = %self.config.model, tokens = completion.total_tokens, "Completion received");
        Ok(completion)
    }
}
