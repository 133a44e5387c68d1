//! Chat completion clients.

mod openai;

pub use openai::{OpenAIChatClient, OpenAIChatConfig};

use async_trait::async_trait;

use crate::error::PipelineResult;

/// Text of a completion plus the usage the API reported for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// Prompt + completion tokens
    pub total_tokens: u64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Complete `prompt` under the `system` instruction.
    async fn complete(&self, system: &str, prompt: &str) -> PipelineResult<Completion>;
}
