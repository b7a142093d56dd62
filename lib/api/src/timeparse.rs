//! Natural-language time parsing.
//!
//! The ingestion API accepts a `time_as_text` field ("next Monday at 3 PM",
//! "every day at 15:00") and resolves it to either an absolute instant or a
//! cron expression through a `TimeParser`. The production implementation
//! calls an OpenAI-compatible chat-completions endpoint; parsing is optional
//! and the core pipeline never depends on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The resolved form of a natural-language schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedSchedule {
    /// A one-shot absolute instant.
    At(DateTime<Utc>),
    /// A recurring 5-field cron expression.
    Cron(String),
}

/// Errors from natural-language time parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeParseError {
    /// The parsing backend could not be reached.
    Unavailable { reason: String },
    /// The text did not resolve to a time or a cron expression.
    Unparseable { text: String },
    /// The backend returned something unusable.
    InvalidReply { reason: String },
}

impl fmt::Display for TimeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "time parser unavailable: {reason}"),
            Self::Unparseable { text } => {
                write!(f, "could not interpret '{text}' as a time or cron expression")
            }
            Self::InvalidReply { reason } => write!(f, "invalid parser reply: {reason}"),
        }
    }
}

impl std::error::Error for TimeParseError {}

/// Resolves natural-language scheduling text.
#[async_trait]
pub trait TimeParser: Send + Sync {
    /// Parses `text` relative to `now`.
    async fn parse(&self, text: &str, now: DateTime<Utc>)
        -> Result<ParsedSchedule, TimeParseError>;
}

const SYSTEM_PROMPT: &str = r#"Convert the user's scheduling request into exactly one of:
- "timeString": an ISO 8601 instant in UTC, for a specific one-time moment
- "cronExpression": a 5-field cron expression, for a recurring request

Reply with JSON only, in the shape {"timeString": ..., "cronExpression": ...},
setting exactly one field and the other to null. If the request is neither a
specific moment nor a recurrence, set both fields to null."#;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat<'a>,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatReply {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ResolvedTime {
    #[serde(rename = "timeString")]
    time_string: Option<String>,
    #[serde(rename = "cronExpression")]
    cron_expression: Option<String>,
}

/// Chat-completions-backed time parser.
pub struct LlmTimeParser {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl LlmTimeParser {
    /// Default model used when none is configured.
    pub const DEFAULT_MODEL: &'static str = "llama-3.1-70b-versatile";

    /// Creates a parser against the given endpoint.
    #[must_use]
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, model: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
        }
    }
}

#[async_trait]
impl TimeParser for LlmTimeParser {
    async fn parse(
        &self,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<ParsedSchedule, TimeParseError> {
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            max_tokens: 200,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("Request: {text}. Current time in UTC: {}", now.to_rfc3339()),
                },
            ],
        };

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| TimeParseError::Unavailable {
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(TimeParseError::Unavailable {
                reason: format!("status {}", response.status()),
            });
        }

        let reply: ChatReply = response.json().await.map_err(|e| TimeParseError::InvalidReply {
            reason: e.to_string(),
        })?;
        let content = reply
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or_else(|| TimeParseError::InvalidReply {
                reason: "empty choices".to_string(),
            })?;

        let resolved: ResolvedTime =
            serde_json::from_str(content).map_err(|e| TimeParseError::InvalidReply {
                reason: e.to_string(),
            })?;

        match (resolved.time_string, resolved.cron_expression) {
            (Some(instant), None) => {
                let at = DateTime::parse_from_rfc3339(&instant)
                    .map_err(|e| TimeParseError::InvalidReply {
                        reason: format!("bad timeString '{instant}': {e}"),
                    })?
                    .with_timezone(&Utc);
                Ok(ParsedSchedule::At(at))
            }
            (None, Some(expression)) => Ok(ParsedSchedule::Cron(expression)),
            _ => Err(TimeParseError::Unparseable {
                text: text.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_time_deserializes_either_field() {
        let instant: ResolvedTime =
            serde_json::from_str(r#"{"timeString":"2026-01-22T15:00:00Z","cronExpression":null}"#)
                .expect("valid json");
        assert_eq!(instant.time_string.as_deref(), Some("2026-01-22T15:00:00Z"));
        assert!(instant.cron_expression.is_none());

        let cron: ResolvedTime =
            serde_json::from_str(r#"{"timeString":null,"cronExpression":"0 15 * * *"}"#)
                .expect("valid json");
        assert_eq!(cron.cron_expression.as_deref(), Some("0 15 * * *"));
    }

    #[test]
    fn parse_error_display() {
        let err = TimeParseError::Unparseable {
            text: "gibberish".to_string(),
        };
        assert!(err.to_string().contains("gibberish"));
    }
}
