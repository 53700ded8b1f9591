//! Error types shared by every telestore backend

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Boxed backend error kept as the `source()` of a [`StoreError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Payload cannot be stored as-is: bad cast, bad shape or wrong kind
    #[error("Invalid message: {reason}")]
    InvalidMessage {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Invalid payload key: {0}")]
    InvalidKey(String),

    /// The table backing a JSON format does not exist yet
    #[error("Schema missing for format {format}")]
    SchemaMissing {
        format: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to save messages")]
    SaveFailed(#[source] BoxError),

    #[error("Failed to read messages")]
    ReadFailed(#[source] BoxError),

    #[error("Failed to delete messages")]
    DeleteFailed(#[source] BoxError),

    /// Rollback failed after `original`; the transaction outcome is unknown
    #[error("Transaction rollback failed: {rollback} (original error: {original})")]
    TransactionRollbackFailed {
        original: Box<StoreError>,
        rollback: BoxError,
    },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn invalid_message_from(reason: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub fn save(err: impl Into<BoxError>) -> Self {
        Self::SaveFailed(err.into())
    }

    pub fn read(err: impl Into<BoxError>) -> Self {
        Self::ReadFailed(err.into())
    }

    pub fn delete(err: impl Into<BoxError>) -> Self {
        Self::DeleteFailed(err.into())
    }

    /// Stable code for the API layer to map onto its own status codes
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidMessage { .. } => "INVALID_MESSAGE",
            Self::InvalidKey(_) => "INVALID_KEY",
            Self::SchemaMissing { .. } => "SCHEMA_MISSING",
            Self::SaveFailed(_) => "SAVE_FAILED",
            Self::ReadFailed(_) => "READ_FAILED",
            Self::DeleteFailed(_) => "DELETE_FAILED",
            Self::TransactionRollbackFailed { .. } => "TRANSACTION_ROLLBACK_FAILED",
            Self::InvalidQuery(_) => "INVALID_QUERY",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Errors caused by the caller's input rather than the backend
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMessage { .. } | Self::InvalidKey(_) | Self::InvalidQuery(_)
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::invalid_message_from("malformed JSON", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_rollback_failure_keeps_both_errors() {
        let original = StoreError::save(std::io::Error::other("insert failed"));
        let err = StoreError::TransactionRollbackFailed {
            original: Box::new(original),
            rollback: Box::new(std::io::Error::other("connection reset")),
        };

        let message = err.to_string();
        assert!(message.contains("connection reset"));
        assert!(message.contains("Failed to save messages"));
        assert_eq!(err.error_code(), "TRANSACTION_ROLLBACK_FAILED");
    }

    #[test]
    fn test_source_is_retained() {
        let err = StoreError::read(std::io::Error::other("timeout"));
        let source = err.source().expect("source kept");
        assert_eq!(source.to_string(), "timeout");
        assert!(!err.is_client_error());
        assert!(StoreError::InvalidKey("a/b".into()).is_client_error());
    }
}
