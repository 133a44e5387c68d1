use messaging::ErrorCategory;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Reference point not found for mail {0}")]
    ReferenceNotFound(String),

    #[error("Reference lookup for mail {id} matched {matches} points")]
    AmbiguousReference { id: String, matches: usize },

    #[error("Reference point for mail {0} carries no vector")]
    MissingVector(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Qdrant error: {0}")]
    Qdrant(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type VectorResult<T> = Result<T, VectorError>;

impl VectorError {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            VectorError::Qdrant(_) | VectorError::Embedding(_) => ErrorCategory::Transient,
            VectorError::CollectionNotFound(_)
            | VectorError::ReferenceNotFound(_)
            | VectorError::AmbiguousReference { .. }
            | VectorError::MissingVector(_)
            | VectorError::Validation(_)
            | VectorError::Config(_)
            | VectorError::Internal(_) => ErrorCategory::Permanent,
        }
    }
}

impl From<qdrant_client::QdrantError> for VectorError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        VectorError::Qdrant(err.to_string())
    }
}

impl From<reqwest::Error> for VectorError {
    fn from(err: reqwest::Error) -> Self {
        VectorError::Embedding(err.to_string())
    }
}

impl From<serde_json::Error> for VectorError {
    fn from(err: serde_json::Error) -> Self {
        VectorError::Internal(format!("JSON error: {}", err))
    }
}
