//! Error types for queue operations.

use std::fmt;
use thiserror::Error;

/// Error categories determine how a worker reacts to a failure.
///
/// - **Transient**: temporary failure, abandon the unit of work and rely on redelivery
/// - **Permanent**: bad data or configuration, retrying will not help
/// - **RateLimited**: upstream asked us to slow down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    Permanent,
    RateLimited,
}

impl ErrorCategory {
    /// Whether retrying the same unit of work can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorCategory::Permanent)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Permanent => write!(f, "permanent"),
            ErrorCategory::RateLimited => write!(f, "rate_limited"),
        }
    }
}

/// Error that can occur in buffer operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No message became available within the fetch timeout.
    ///
    /// This is not a failure of the broker; callers back off and poll again.
    #[error("no message available")]
    NotAvailable,

    /// Broker connection or request failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Publishing a message failed
    #[error("publish error: {0}")]
    Publish(String),

    /// Acknowledging a message failed
    #[error("ack error: {0}")]
    Ack(String),

    /// A delivered message could not be decoded; it has been terminated
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Invalid buffer configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl QueueError {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            QueueError::NotAvailable
            | QueueError::Transport(_)
            | QueueError::Publish(_)
            | QueueError::Ack(_) => ErrorCategory::Transient,
            QueueError::Malformed(_) | QueueError::Config(_) => ErrorCategory::Permanent,
        }
    }

    /// True for the empty-queue condition.
    pub fn is_not_available(&self) -> bool {
        matches!(self, QueueError::NotAvailable)
    }

    pub fn transport(error: impl fmt::Display) -> Self {
        Self::Transport(error.to_string())
    }

    pub fn publish(error: impl fmt::Display) -> Self {
        Self::Publish(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_available_is_distinct_from_transport() {
        assert!(QueueError::NotAvailable.is_not_available());
        assert!(!QueueError::transport("connection reset").is_not_available());
        assert_eq!(
            QueueError::transport("connection reset").category(),
            ErrorCategory::Transient
        );
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            QueueError::Malformed("seq 4".into()).category(),
            ErrorCategory::Permanent
        );
        assert_eq!(
            QueueError::Config("no url".into()).category(),
            ErrorCategory::Permanent
        );
        assert!(ErrorCategory::Transient.is_retryable());
        assert!(ErrorCategory::RateLimited.is_retryable());
        assert!(!ErrorCategory::Permanent.is_retryable());
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::RateLimited.to_string(), "rate_limited");
    }
}
