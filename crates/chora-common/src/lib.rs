//! # Chora Common
//!
//! Shared error types, logging configuration and retry utilities for the
//! Chora offline caching subsystem.

use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, RetryConfig};

/// Unified error type for the offline subsystem.
#[derive(Error, Debug)]
pub enum ChoraError {
    /// Cache store errors (snapshot encoding, partition bookkeeping).
    #[error("Cache error: {0}")]
    Cache(String),

    /// Network errors surfaced by a retrieval strategy.
    #[error("Network error: {0}")]
    Network(String),

    /// Worker lifecycle errors (invalid state transitions).
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// A requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O errors from the backing store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChoraError {
    /// Create a new cache error.
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create a new network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a new lifecycle error.
    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::Lifecycle(msg.into())
    }
}

/// Result type alias for offline subsystem operations.
pub type Result<T> = std::result::Result<T, ChoraError>;

/// Milliseconds since the Unix epoch, saturating to zero on clock skew.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChoraError::cache("snapshot failed");
        assert_eq!(err.to_string(), "Cache error: snapshot failed");

        let err = ChoraError::network("connection refused");
        assert_eq!(err.to_string(), "Network error: connection refused");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: ChoraError = io.into();
        assert!(matches!(err, ChoraError::Io(_)));
    }

    #[test]
    fn test_now_millis_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
        assert!(a > 0);
    }
}
