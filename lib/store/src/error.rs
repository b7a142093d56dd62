//! Error types for the store crate.

use std::fmt;

/// Errors from schedule store operations.
///
/// `is_transient` separates failures worth retrying on the next tick
/// (connectivity, pool exhaustion) from permanent ones (undecodable rows),
/// which leave the record in place for the reaper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or timed out.
    Unavailable { reason: String },
    /// A query failed at the backend.
    QueryFailed { reason: String },
    /// A stored row could not be decoded into a record.
    Decode { reason: String },
}

impl StoreError {
    /// Returns true if the operation may succeed when retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::QueryFailed { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "store unavailable: {reason}"),
            Self::QueryFailed { reason } => write!(f, "store query failed: {reason}"),
            Self::Decode { reason } => write!(f, "store row decode failed: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => Self::Decode {
                reason: e.to_string(),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Unavailable {
                reason: e.to_string(),
            },
            other => Self::QueryFailed {
                reason: other.to_string(),
            },
        }
    }
}
