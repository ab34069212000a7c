//! Error types for glimmer.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using glimmer's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for glimmer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Inference/generation failed (transient provider failure, 5xx, bad payload)
    #[error("Inference error: {0}")]
    Inference(String),

    /// The AI provider throttled the call.
    ///
    /// `retry_after` carries the provider's suggested delay when one was sent.
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// An operation exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Cache backing store failed
    #[error("Cache error: {0}")]
    Cache(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Query execution failed
    #[error("Query error: {0}")]
    Query(String),

    /// Object store read failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a rate-limit error with an optional provider retry hint.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Error::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    /// Whether the provider signalled throttling.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }

    /// Provider-suggested delay, if this is a rate-limit error that carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("photo".to_string());
        assert_eq!(err.to_string(), "Not found: photo");
    }

    #[test]
    fn test_error_display_job_not_found() {
        let id = Uuid::nil();
        let err = Error::JobNotFound(id);
        assert_eq!(err.to_string(), format!("Job not found: {}", id));
    }

    #[test]
    fn test_error_display_rate_limited() {
        let err = Error::rate_limited("quota exhausted", Some(Duration::from_secs(7)));
        assert_eq!(err.to_string(), "Rate limited: quota exhausted");
    }

    #[test]
    fn test_rate_limited_helpers() {
        let err = Error::rate_limited("slow down", Some(Duration::from_secs(3)));
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));

        let err = Error::rate_limited("slow down", None);
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_other_errors_are_not_rate_limited() {
        let err = Error::Inference("502 bad gateway".to_string());
        assert!(!err.is_rate_limited());
        assert_eq!(err.retry_after(), None);

        let err = Error::Timeout("30s".to_string());
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn test_error_display_query() {
        let err = Error::Query("statement timeout".to_string());
        assert_eq!(err.to_string(), "Query error: statement timeout");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing blob");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("missing blob"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
