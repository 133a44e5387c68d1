use async_trait::async_trait;

use crate::error::VectorResult;

/// Trait for embedding generation engines
///
/// Implementations call an external embedding API. An empty vector is a valid
/// answer and means "nothing to index".
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> VectorResult<Vec<f32>>;

    /// Make the engine ready to serve (e.g. download the model).
    async fn prepare(&self) -> VectorResult<()> {
        Ok(())
    }
}
