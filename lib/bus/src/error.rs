//! Error types for the bus crate.

use std::fmt;

/// Errors from message bus operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Failed to connect or set up streams.
    ConnectionFailed { message: String },
    /// Failed to publish a message.
    PublishFailed { message: String },
    /// Failed to fetch messages.
    FetchFailed { message: String },
    /// Failed to acknowledge a message.
    AckFailed { message: String },
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { message } => {
                write!(f, "bus connection failed: {message}")
            }
            Self::PublishFailed { message } => write!(f, "bus publish failed: {message}"),
            Self::FetchFailed { message } => write!(f, "bus fetch failed: {message}"),
            Self::AckFailed { message } => write!(f, "bus ack failed: {message}"),
        }
    }
}

impl std::error::Error for BusError {}
