mod ollama;
mod openai;
mod provider;

pub use ollama::{OllamaConfig, OllamaEmbedder};
pub use openai::{OpenAIConfig, OpenAIEmbedder};
pub use provider::Embedder;

#[cfg(test)]
pub use provider::MockEmbedder;
