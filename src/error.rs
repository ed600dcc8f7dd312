//! Error taxonomy for aerodoc
//!
//! Every public operation resolves with a typed result or exactly one
//! `QueryError`. Error codes follow the `AERO_CATEGORY_NAME` format.
//!
//! | Variant              | Code                      | Retried |
//! |----------------------|---------------------------|---------|
//! | `Translation`        | AERO_QUERY_TRANSLATION    | never   |
//! | `UniqueConstraint`   | AERO_UNIQUE_CONSTRAINT    | never   |
//! | `Validation`         | AERO_VALIDATION_FAILED    | never   |
//! | `Cancelled`          | AERO_OPERATION_CANCELLED  | never   |
//! | `TransientStorage`   | AERO_STORAGE_BUSY         | policy  |
//! | `Storage`            | AERO_STORAGE_FAILED       | never   |
//! | `Serialization`      | AERO_SERIALIZATION_FAILED | never   |
//! | `Config`             | AERO_CONFIG_INVALID       | never   |

use serde_json::Value;
use thiserror::Error;

/// Result type for aerodoc operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors surfaced by the query translation and execution engine
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// Malformed or type-mismatched filter, update or options.
    /// Raised before any statement reaches the storage engine.
    #[error("Query translation failed: {message}")]
    Translation { message: String },

    /// A unique index rejected the write
    #[error("Unique constraint violated on field '{field}'")]
    UniqueConstraint { field: String },

    /// Document rejected by the validator
    #[error("Validation failed for field '{field}': {message}")]
    Validation {
        field: String,
        value: Value,
        message: String,
    },

    /// Cancellation was observed at a checkpoint
    #[error("Operation cancelled")]
    Cancelled,

    /// Lock or busy contention in the storage engine
    #[error("Storage busy: {0}")]
    TransientStorage(String),

    /// Unclassified storage failure (treated as fatal)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration or schema definition
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl QueryError {
    /// Create a translation error
    pub fn translation(message: impl Into<String>) -> Self {
        Self::Translation {
            message: message.into(),
        }
    }

    /// Create a unique constraint error
    pub fn unique(field: impl Into<String>) -> Self {
        Self::UniqueConstraint {
            field: field.into(),
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, value: Value, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            value,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Translation { .. } => "AERO_QUERY_TRANSLATION",
            Self::UniqueConstraint { .. } => "AERO_UNIQUE_CONSTRAINT",
            Self::Validation { .. } => "AERO_VALIDATION_FAILED",
            Self::Cancelled => "AERO_OPERATION_CANCELLED",
            Self::TransientStorage(_) => "AERO_STORAGE_BUSY",
            Self::Storage(_) => "AERO_STORAGE_FAILED",
            Self::Serialization(_) => "AERO_SERIALIZATION_FAILED",
            Self::Config(_) => "AERO_CONFIG_INVALID",
        }
    }

    /// Only transient storage contention is eligible for retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStorage(_))
    }

    /// Errors that belong to a single batch item rather than the whole batch
    pub fn is_item_level(&self) -> bool {
        matches!(self, Self::UniqueConstraint { .. } | Self::Validation { .. })
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_codes() {
        assert_eq!(QueryError::translation("x").code(), "AERO_QUERY_TRANSLATION");
        assert_eq!(QueryError::unique("email").code(), "AERO_UNIQUE_CONSTRAINT");
        assert_eq!(QueryError::Cancelled.code(), "AERO_OPERATION_CANCELLED");
        assert_eq!(
            QueryError::TransientStorage("busy".into()).code(),
            "AERO_STORAGE_BUSY"
        );
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(QueryError::TransientStorage("locked".into()).is_retryable());
        assert!(!QueryError::Storage("disk I/O".into()).is_retryable());
        assert!(!QueryError::unique("email").is_retryable());
        assert!(!QueryError::validation("age", json!(-1), "negative").is_retryable());
        assert!(!QueryError::translation("bad").is_retryable());
        assert!(!QueryError::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = QueryError::unique("email");
        assert!(err.to_string().contains("email"));

        let err = QueryError::validation("age", json!("x"), "expected integer");
        let display = err.to_string();
        assert!(display.contains("age"));
        assert!(display.contains("expected integer"));
    }
}
