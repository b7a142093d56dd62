//! Ingestion API routes.
//!
//! `POST /schedule` validates and persists a schedule; `POST /webhook/verify`
//! performs the one-time HMAC ownership handshake with the target.

use crate::error::ApiError;
use crate::timeparse::{ParsedSchedule, TimeParser};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use punctual_codec::{verify_signature, PayloadCipher};
use punctual_core::HttpMethod;
use punctual_schedule::{validate_cron, ScheduleDraft};
use punctual_store::{ScheduleStore, VerifiedWebhookStore};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Timeout for the verification handshake with the target.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(3);

/// Header the target must echo during verification.
const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Shared state for the ingestion API.
pub struct ApiContext {
    /// Live schedule storage.
    pub schedules: Arc<dyn ScheduleStore>,
    /// Verified webhook storage.
    pub webhooks: Arc<dyn VerifiedWebhookStore>,
    /// Payload cipher; requests are encrypted before persistence.
    pub cipher: Arc<PayloadCipher>,
    /// Optional natural-language time parser.
    pub time_parser: Option<Arc<dyn TimeParser>>,
    /// Secret for the verification handshake.
    pub webhook_secret: String,
    /// Development mode skips webhook verification.
    pub skip_verification: bool,
    /// Client for the verification handshake.
    pub http: reqwest::Client,
}

/// Builds the ingestion router.
pub fn router(context: Arc<ApiContext>) -> Router {
    Router::new()
        .route("/schedule", post(create_schedule))
        .route("/webhook/verify", post(verify_webhook))
        .with_state(context)
}

/// Request body for `POST /schedule`.
#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    /// Target URL.
    pub webhook_url: String,
    /// "GET" or "POST".
    pub method_type: String,
    /// Arbitrary JSON payload, delivered decrypted to the target.
    pub payload: serde_json::Value,
    /// One-shot trigger instant (RFC 3339, UTC).
    #[serde(default)]
    pub schedule_time: Option<DateTime<Utc>>,
    /// Recurring 5-field cron expression.
    #[serde(default)]
    pub cron_expression: Option<String>,
    /// Natural-language alternative to the two fields above.
    #[serde(default)]
    pub time_as_text: Option<String>,
    /// Scheduler-level retry limit override.
    #[serde(default)]
    pub retry_limit: Option<u32>,
    /// Scheduler-level retry delay override.
    #[serde(default)]
    pub retry_after_seconds: Option<u32>,
    /// Webhook retry limit override.
    #[serde(default)]
    pub webhook_retry_limit: Option<u32>,
    /// Webhook retry delay override.
    #[serde(default)]
    pub webhook_retry_after_seconds: Option<u32>,
}

/// Response body for `POST /schedule`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleResponse {
    /// Human-readable confirmation.
    pub message: String,
    /// First fire instant, RFC 3339.
    pub time: String,
    /// The cron expression, empty for one-shot schedules.
    pub cron: String,
    /// The new record id.
    pub id: String,
}

async fn create_schedule(
    State(ctx): State<Arc<ApiContext>>,
    Json(request): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduleResponse>), ApiError> {
    let method: HttpMethod = request
        .method_type
        .parse()
        .map_err(|_| ApiError::validation("method_type must be GET or POST"))?;

    if request.webhook_url.is_empty() {
        return Err(ApiError::validation("webhook_url must not be empty"));
    }

    if !ctx.skip_verification && !ctx.webhooks.is_verified(&request.webhook_url, method).await? {
        return Err(ApiError::WebhookNotVerified);
    }

    let now = Utc::now();
    let mut schedule_time = request.schedule_time;
    let mut cron_expression = request.cron_expression.clone();

    if let Some(text) = &request.time_as_text {
        if schedule_time.is_some() || cron_expression.is_some() {
            return Err(ApiError::validation(
                "time_as_text cannot be combined with schedule_time or cron_expression",
            ));
        }
        let parser = ctx
            .time_parser
            .as_ref()
            .ok_or(ApiError::TimeParsingUnavailable)?;
        match parser.parse(text, now).await? {
            ParsedSchedule::At(at) => schedule_time = Some(at),
            ParsedSchedule::Cron(expression) => cron_expression = Some(expression),
        }
    }

    match (&schedule_time, &cron_expression) {
        (None, None) => {
            return Err(ApiError::validation(
                "either schedule_time or cron_expression must be provided",
            ));
        }
        (Some(_), Some(_)) => {
            return Err(ApiError::validation(
                "schedule_time and cron_expression cannot both be set",
            ));
        }
        (Some(at), None) if *at <= now => {
            return Err(ApiError::validation("schedule_time must be in the future"));
        }
        _ => {}
    }

    if let Some(expression) = &cron_expression {
        validate_cron(expression).map_err(|e| ApiError::validation(e.to_string()))?;
    }

    let payload_bytes = serde_json::to_vec(&request.payload)
        .map_err(|e| ApiError::validation(format!("unencodable payload: {e}")))?;
    let encrypted = ctx.cipher.encrypt(&payload_bytes);

    let mut draft = ScheduleDraft::new(&request.webhook_url, method, encrypted);
    if let Some(at) = schedule_time {
        draft = draft.at(at);
    }
    if let Some(expression) = cron_expression {
        draft = draft.cron(expression);
    }
    if let Some(limit) = request.retry_limit {
        draft = draft.retry_limit(limit);
    }
    if let Some(seconds) = request.retry_after_seconds {
        draft = draft.retry_after_seconds(seconds);
    }
    if let Some(limit) = request.webhook_retry_limit {
        draft = draft.webhook_retry_limit(limit);
    }
    if let Some(seconds) = request.webhook_retry_after_seconds {
        draft = draft.webhook_retry_after_seconds(seconds);
    }

    let record = draft
        .build(now)
        .map_err(|e| ApiError::validation(e.to_string()))?;
    ctx.schedules.insert(&record).await?;

    info!(
        schedule_id = %record.id,
        next_run = %record.next_run_time,
        recurring = record.is_recurring(),
        "schedule created"
    );

    Ok((
        StatusCode::CREATED,
        Json(ScheduleResponse {
            message: "Task scheduled".to_string(),
            time: record.next_run_time.to_rfc3339(),
            cron: record.cron_expression.unwrap_or_default(),
            id: record.id.to_string(),
        }),
    ))
}

/// Request body for `POST /webhook/verify`.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    /// Target URL to verify.
    pub webhook_url: String,
    /// "GET" or "POST".
    pub method_type: String,
}

async fn verify_webhook(
    State(ctx): State<Arc<ApiContext>>,
    Json(request): Json<VerifyRequest>,
) -> Result<&'static str, ApiError> {
    let method: HttpMethod = request
        .method_type
        .parse()
        .map_err(|_| ApiError::validation("method_type must be GET or POST"))?;

    if request.webhook_url.is_empty() {
        return Err(ApiError::validation("webhook_url must not be empty"));
    }

    if ctx.webhooks.is_verified(&request.webhook_url, method).await? {
        return Err(ApiError::validation("webhook already verified"));
    }

    let response = ctx
        .http
        .post(&request.webhook_url)
        .header(CONTENT_TYPE, "application/json")
        .timeout(VERIFY_TIMEOUT)
        .send()
        .await
        .map_err(|e| ApiError::VerificationFailed {
            message: e.to_string(),
        })?;

    let echoed = response
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if !verify_signature(&ctx.webhook_secret, &request.webhook_url, echoed) {
        return Err(ApiError::VerificationFailed {
            message: "signature mismatch".to_string(),
        });
    }

    ctx.webhooks.add(&request.webhook_url, method).await?;
    info!(webhook_url = %request.webhook_url, method = %method, "webhook verified");

    Ok("Webhook successfully verified")
}
