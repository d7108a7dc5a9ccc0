//! Key-value store error types
//!
//! Defines all errors that can occur while talking to a store backend.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in a store backend
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend cannot be reached or refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Operation did not finish within the configured bound
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Key holds a different structure than the command expects
    #[error("Wrong type for key {key}: expected {expected}")]
    WrongType { key: String, expected: &'static str },

    /// Stored value could not be interpreted
    #[error("Invalid value for key {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    /// SQLite backend error
    #[error("SQLite error: {0}")]
    Sqlite(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Sqlite(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Unavailable(format!("store task failed: {}", err))
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::WrongType {
            key: "logs:timeline".to_string(),
            expected: "zset",
        };
        assert_eq!(
            err.to_string(),
            "Wrong type for key logs:timeline: expected zset"
        );

        let err = StoreError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Store operation timed out after 250ms");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let store_err: StoreError = io_err.into();
        assert!(matches!(store_err, StoreError::Io(_)));
    }
}
