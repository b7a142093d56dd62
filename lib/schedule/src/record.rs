//! The schedule record and its status state machine.
//!
//! A `ScheduleRecord` is the sole first-class entity of the system. It is
//! created by the ingestion API, mutated only through the store's atomic
//! updates, and moved to the archive when it reaches a terminal status.

use chrono::{DateTime, Utc};
use punctual_core::{HttpMethod, ScheduleId};
use serde::{Deserialize, Serialize};

/// Default scheduler-level retry limit.
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Default delay before a scheduler-level retry, in seconds.
pub const DEFAULT_RETRY_AFTER_SECONDS: u32 = 30;

/// Default webhook (inner-loop) retry limit.
pub const DEFAULT_WEBHOOK_RETRY_LIMIT: u32 = 3;

/// Default delay between webhook retries, in seconds.
pub const DEFAULT_WEBHOOK_RETRY_AFTER_SECONDS: u32 = 30;

/// Status of a schedule record.
///
/// Transitions:
/// `pending → processing` (producer claim), `processing → in-progress`
/// (dispatcher pick), `in-progress → completed | failed` (delivery outcome),
/// and `in-progress/processing → pending` on a scheduler-level retry.
/// `completed` and `failed` are terminal and always accompanied by a move to
/// the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleStatus {
    /// Waiting for its due window.
    Pending,
    /// Claimed by a producer and published onto the bus.
    Processing,
    /// A dispatcher worker is executing the webhook.
    InProgress,
    /// Delivered successfully.
    Completed,
    /// Gave up after exhausting retries, or failed permanently.
    Failed,
}

impl ScheduleStatus {
    /// Returns the wire/database name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its wire name, defaulting unknown values to
    /// `Pending` so a corrupted row stays reachable by the reaper.
    #[must_use]
    pub fn from_str_value(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "in-progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A scheduled webhook invocation.
///
/// Exactly one of `schedule_time` / `cron_expression` is set when a record
/// is created through the API; a record spawned by cron re-arming carries
/// both (the next occurrence as its `schedule_time`, the expression so the
/// chain continues).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    /// Unique identifier.
    pub id: ScheduleId,
    /// The URL to invoke.
    pub webhook_url: String,
    /// HTTP method for the invocation.
    pub method: HttpMethod,
    /// Encrypted payload, opaque to the engine.
    pub payload: String,
    /// Specific instant for one-shot schedules.
    pub schedule_time: Option<DateTime<Utc>>,
    /// Cron expression for recurring schedules.
    pub cron_expression: Option<String>,
    /// When the record is next due. Mutated on scheduler-level retries.
    pub next_run_time: DateTime<Utc>,
    /// Current status.
    pub status: ScheduleStatus,
    /// Scheduler-level retries performed so far.
    pub retries: u32,
    /// Scheduler-level retry limit.
    pub retry_limit: u32,
    /// Delay before a scheduler-level retry, in seconds.
    pub retry_after_seconds: u32,
    /// Webhook retries performed within the current attempt.
    pub webhook_retry_count: u32,
    /// Webhook (inner-loop) retry limit.
    pub webhook_retry_limit: u32,
    /// Delay between webhook retries, in seconds.
    pub webhook_retry_after_seconds: u32,
    /// Number of times the record has entered `in-progress`.
    pub run_count: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ScheduleRecord {
    /// Returns true if the record recurs on a cron expression.
    #[must_use]
    pub fn is_recurring(&self) -> bool {
        self.cron_expression.is_some()
    }

    /// Returns true if the record is due at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run_time <= now
    }

    /// Returns true if the inner webhook-retry budget is exhausted.
    #[must_use]
    pub fn webhook_retries_exhausted(&self) -> bool {
        self.webhook_retry_count >= self.webhook_retry_limit
    }

    /// Returns true if one more scheduler-level retry would reach the limit.
    ///
    /// A record whose next retry reaches the limit is archived as failed
    /// instead of being requeued, so `retries` never exceeds `retry_limit`.
    #[must_use]
    pub fn retry_budget_exhausted(&self) -> bool {
        self.retries.saturating_add(1) >= self.retry_limit
    }
}
