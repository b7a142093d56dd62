//! Error types for the cache crate.

use std::fmt;

/// Errors from ephemeral cache operations.
///
/// Cache failures are always advisory: callers log them and fall back to
/// the durable store, which remains the ground truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The cache backend could not be reached.
    Unavailable { reason: String },
    /// A command failed at the backend.
    CommandFailed { reason: String },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "cache unavailable: {reason}"),
            Self::CommandFailed { reason } => write!(f, "cache command failed: {reason}"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
            Self::Unavailable {
                reason: e.to_string(),
            }
        } else {
            Self::CommandFailed {
                reason: e.to_string(),
            }
        }
    }
}
