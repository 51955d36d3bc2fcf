//! Error type definitions
//!
//! Provides all error types surfaced by queue submission, job lookup,
//! worker execution and broker calls.

use fred::error::{RedisError, RedisErrorKind};
use std::time::Duration;

/// Result type alias for dispatchq
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for dispatchq
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Redis-related errors that are not connectivity failures
    #[error("Redis error: {0}")]
    Redis(RedisError),

    /// The queue persistence backend cannot be reached
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Operation attempted on a queue handle that was already closed
    #[error("Queue closed: {0}")]
    QueueClosed(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Job option or payload validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// No service or action registered under the called name
    #[error("Action not found: {0}")]
    ActionNotFound(String),

    /// Action handler errors
    #[error("{0}")]
    Handler(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,

    /// Unknown errors
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<RedisError> for Error {
    fn from(err: RedisError) -> Self {
        match err.kind() {
            RedisErrorKind::IO | RedisErrorKind::Timeout | RedisErrorKind::Canceled => {
                Error::QueueUnavailable(err.to_string())
            }
            _ => Error::Redis(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// Build a handler error from any displayable message
    pub fn handler(message: impl Into<String>) -> Self {
        Error::Handler(message.into())
    }

    /// Check if the error means the queue backend could not be reached
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::QueueUnavailable(_))
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Redis(_) | Error::QueueUnavailable(_))
    }

    /// Check if the error is fatal (non-recoverable)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::Config(_) | Error::Shutdown | Error::QueueClosed(_)
        )
    }

    /// Get the suggested retry delay
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::QueueUnavailable(_) => Some(Duration::from_secs(5)),
            Error::Redis(_) => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_errors_map_to_unavailable() {
        let err: Error = RedisError::new(RedisErrorKind::IO, "connection refused").into();
        assert!(err.is_unavailable());
        assert!(err.is_retryable());

        let err: Error = RedisError::new(RedisErrorKind::Timeout, "timed out").into();
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_other_redis_errors_stay_redis() {
        let err: Error = RedisError::new(RedisErrorKind::InvalidArgument, "bad").into();
        assert!(matches!(err, Error::Redis(_)));
        assert!(!err.is_unavailable());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(Error::Validation("test".to_string()).is_fatal());
        assert!(Error::QueueClosed("jobs".to_string()).is_fatal());
        assert!(!Error::QueueUnavailable("test".to_string()).is_fatal());
        assert_eq!(
            Error::QueueUnavailable("x".into()).retry_after(),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_handler_error_displays_message_verbatim() {
        let err = Error::handler("insufficient funds");
        assert_eq!(err.to_string(), "insufficient funds");
    }
}
