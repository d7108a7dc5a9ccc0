//! Log engine error types
//!
//! Ingestion and query components return [`LogResult`]; the service facade
//! decides which of these reach a caller (none of them do for ingestion).

use crate::store::StoreError;
use thiserror::Error;

/// Errors that can occur in the log engine
#[derive(Error, Debug)]
pub enum LogError {
    /// Store connection failed or an operation timed out
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    /// A record key could not be split into timestamp, request id and line
    #[error("Malformed record key: {0}")]
    MalformedKey(String),

    /// Rejected input (timestamp, paging parameters)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Stored data could not be decoded
    #[error("Corrupt data at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl LogError {
    pub fn validation(message: impl Into<String>) -> Self {
        LogError::Validation(message.into())
    }

    /// Whether the failure came from the store rather than the data
    pub fn is_store_failure(&self) -> bool {
        matches!(self, LogError::StoreUnavailable(_))
    }
}

/// Result type alias for log engine operations
pub type LogResult<T> = Result<T, LogError>;
