use core_config::ConfigError;
use domain_vector::VectorError;
use messaging::{ErrorCategory, QueueError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Env(#[from] ConfigError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Completion error: {0}")]
    Completion(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::Queue(e) => e.category(),
            PipelineError::Vector(e) => e.category(),
            PipelineError::RateLimited(_) => ErrorCategory::RateLimited,
            PipelineError::Source(_)
            | PipelineError::Storage(_)
            | PipelineError::Completion(_)
            | PipelineError::Io(_) => ErrorCategory::Transient,
            PipelineError::Config(_)
            | PipelineError::Env(_)
            | PipelineError::ObjectNotFound(_)
            | PipelineError::Tokenizer(_)
            | PipelineError::InvalidData(_) => ErrorCategory::Permanent,
        }
    }

    /// The record's own point is gone or already consumed, so retrying the
    /// message can never succeed.
    pub fn is_stale_reference(&self) -> bool {
        matches!(self, PipelineError::Vector(VectorError::ReferenceNotFound(_)))
    }
}

impl From<serde_yaml_ng::Error> for PipelineError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        PipelineError::Config(err.to_string())
    }
}
