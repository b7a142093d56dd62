//! Error types for the ingestion API.

use crate::timeparse::TimeParseError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use punctual_store::StoreError;
use serde_json::json;
use std::fmt;

/// Errors surfaced by API handlers.
#[derive(Debug)]
pub enum ApiError {
    /// The request payload failed validation.
    Validation { message: String },
    /// The target webhook has not passed one-time verification.
    WebhookNotVerified,
    /// `time_as_text` was supplied but no parser is configured.
    TimeParsingUnavailable,
    /// The natural-language time could not be resolved.
    TimeParsing { message: String },
    /// The webhook verification handshake failed.
    VerificationFailed { message: String },
    /// The store rejected the operation.
    Store(StoreError),
}

impl ApiError {
    /// Shorthand for a validation failure.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { message } => write!(f, "{message}"),
            Self::WebhookNotVerified => write!(f, "webhook is not verified"),
            Self::TimeParsingUnavailable => {
                write!(f, "natural-language scheduling is not configured")
            }
            Self::TimeParsing { message } => {
                write!(f, "failed to resolve time_as_text: {message}")
            }
            Self::VerificationFailed { message } => {
                write!(f, "webhook verification failed: {message}")
            }
            Self::Store(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<TimeParseError> for ApiError {
    fn from(e: TimeParseError) -> Self {
        Self::TimeParsing {
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
