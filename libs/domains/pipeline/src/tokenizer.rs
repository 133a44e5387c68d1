//! Token counting for prompt packing.

use tiktoken_rs::CoreBPE;

use crate::error::{PipelineError, PipelineResult};

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// BPE counter matching the encoding of an OpenAI model.
pub struct TiktokenCounter {
    model: String,
    bpe: CoreBPE,
}

impl TiktokenCounter {
    /// Resolve the encoding for `model` (e.g. `gpt-4o` resolves to `o200k_base`).
    pub fn for_model(model: &str) -> PipelineResult<Self> {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .map_err(|e| PipelineError::Tokenizer(format!("{model}: {e}")))?;
        Ok(Self {
            model: model.to_string(),
            bpe,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// One token per whitespace-separated word.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceCounter;

impl TokenCounter for WhitespaceCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}
