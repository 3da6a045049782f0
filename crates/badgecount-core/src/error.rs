//! Error types for badgecount
//!
//! The taxonomy mirrors how failures are handled, not where they occur:
//! validation problems are filtered out before they become errors,
//! precondition failures degrade to zero/no-op results, and degraded-data
//! situations (no federation identity, unreachable peer) silently fall
//! back to narrower but correct computation. Only failures that would
//! otherwise produce an incorrect count surface through this type.

use thiserror::Error;

/// Result type alias for badgecount operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for badgecount
#[derive(Debug, Error)]
pub enum Error {
    /// The authoritative event store failed; retryable by the caller.
    #[error("Store error: {0}")]
    Store(String),

    /// The summary-store connection pool failed or timed out.
    #[error("Pool error: {0}")]
    Pool(String),

    /// A peer node RPC failed.
    #[error("Peer '{peer}' unavailable: {message}")]
    PeerRpc { peer: String, message: String },

    /// A peer node RPC exceeded its time budget.
    #[error("Peer '{peer}' timed out")]
    PeerTimeout { peer: String },

    /// The store is in read-only maintenance mode.
    #[error("Store is in read-only mode")]
    ReadOnly,

    #[error("Invalid {field}: {message}")]
    InvalidArgument {
        field: &'static str,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            message: message.into(),
        }
    }

    /// Returns the error type string (for structured responses and logs)
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Store(_) => "STORE_ERROR",
            Self::Pool(_) => "POOL_ERROR",
            Self::PeerRpc { .. } | Self::PeerTimeout { .. } => "PEER_UNAVAILABLE",
            Self::ReadOnly => "READ_ONLY",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Serialization(_) => "TYPE_ERROR",
            Self::Internal(_) => "UNHANDLED_EXCEPTION",
        }
    }

    /// Returns whether the error is recoverable (the caller can retry)
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Store(_)
                | Self::Pool(_)
                | Self::PeerRpc { .. }
                | Self::PeerTimeout { .. }
                | Self::ReadOnly
        )
    }
}
