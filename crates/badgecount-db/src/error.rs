//! Error types for the summary storage layer

use thiserror::Error;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    /// `SQLite` error from the underlying driver
    #[error("SQLite error: {0}")]
    Sqlite(String),

    /// Connection pool error (exhausted, acquire timeout)
    #[error("Pool error: {0}")]
    Pool(String),

    /// Invalid argument
    #[error("Invalid {field}: {message}")]
    InvalidArgument {
        field: &'static str,
        message: String,
    },

    /// Schema/migration error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for storage operations
pub type DbResult<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Create an invalid argument error
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            message: message.into(),
        }
    }

    /// Whether this error indicates a retryable lock/busy condition.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Sqlite(msg) => is_lock_error(msg),
            Self::Pool(_) => true,
            _ => false,
        }
    }

    /// The stable error code string for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "DATABASE_ERROR",
            Self::Pool(_) => "DATABASE_POOL_ERROR",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Schema(_) => "SCHEMA_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Check whether an error message indicates a database lock/busy condition.
#[must_use]
pub fn is_lock_error(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("database is locked")
        || lower.contains("database is busy")
        || lower.contains("locked")
        || lower.contains("unable to open database")
}
