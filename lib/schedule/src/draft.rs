//! Draft builder that overlays explicitly-set fields onto defaults.
//!
//! Every field the caller may override is a tagged optional; `build`
//! merges the set fields over the defaults and derives `next_run_time`
//! from the trigger, replacing the reflection-based partial copy of older
//! implementations with an explicit merge.

use crate::cron::CronSchedule;
use crate::error::ScheduleError;
use crate::record::{
    ScheduleRecord, ScheduleStatus, DEFAULT_RETRY_AFTER_SECONDS, DEFAULT_RETRY_LIMIT,
    DEFAULT_WEBHOOK_RETRY_AFTER_SECONDS, DEFAULT_WEBHOOK_RETRY_LIMIT,
};
use chrono::{DateTime, Utc};
use punctual_core::{HttpMethod, ScheduleId};

/// A partially-specified schedule, to be completed with defaults.
#[derive(Debug, Clone)]
pub struct ScheduleDraft {
    webhook_url: String,
    method: HttpMethod,
    payload: String,
    schedule_time: Option<DateTime<Utc>>,
    cron_expression: Option<String>,
    retry_limit: Option<u32>,
    retry_after_seconds: Option<u32>,
    webhook_retry_limit: Option<u32>,
    webhook_retry_after_seconds: Option<u32>,
}

impl ScheduleDraft {
    /// Starts a draft for the given target.
    #[must_use]
    pub fn new(
        webhook_url: impl Into<String>,
        method: HttpMethod,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            method,
            payload: payload.into(),
            schedule_time: None,
            cron_expression: None,
            retry_limit: None,
            retry_after_seconds: None,
            webhook_retry_limit: None,
            webhook_retry_after_seconds: None,
        }
    }

    /// Sets a one-shot trigger instant.
    #[must_use]
    pub fn at(mut self, schedule_time: DateTime<Utc>) -> Self {
        self.schedule_time = Some(schedule_time);
        self
    }

    /// Sets a recurring cron trigger.
    #[must_use]
    pub fn cron(mut self, expression: impl Into<String>) -> Self {
        self.cron_expression = Some(expression.into());
        self
    }

    /// Overrides the scheduler-level retry limit.
    #[must_use]
    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = Some(limit);
        self
    }

    /// Overrides the scheduler-level retry delay.
    #[must_use]
    pub fn retry_after_seconds(mut self, seconds: u32) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }

    /// Overrides the webhook retry limit.
    #[must_use]
    pub fn webhook_retry_limit(mut self, limit: u32) -> Self {
        self.webhook_retry_limit = Some(limit);
        self
    }

    /// Overrides the webhook retry delay.
    #[must_use]
    pub fn webhook_retry_after_seconds(mut self, seconds: u32) -> Self {
        self.webhook_retry_after_seconds = Some(seconds);
        self
    }

    /// Completes the draft into a pending record.
    ///
    /// Exactly one of the trigger fields must be set. For a cron trigger the
    /// first occurrence after `now` becomes `next_run_time`; for a one-shot
    /// trigger the instant itself does.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::MissingTrigger`] or
    /// [`ScheduleError::ConflictingTriggers`] when the trigger fields are
    /// absent or both present, and an invalid-cron error when the expression
    /// does not parse.
    pub fn build(self, now: DateTime<Utc>) -> Result<ScheduleRecord, ScheduleError> {
        let next_run_time = match (&self.schedule_time, &self.cron_expression) {
            (None, None) => return Err(ScheduleError::MissingTrigger),
            (Some(_), Some(_)) => return Err(ScheduleError::ConflictingTriggers),
            (Some(at), None) => *at,
            (None, Some(expr)) => CronSchedule::parse(expr)?.next_after(now)?,
        };

        Ok(ScheduleRecord {
            id: ScheduleId::new(),
            webhook_url: self.webhook_url,
            method: self.method,
            payload: self.payload,
            schedule_time: self.schedule_time,
            cron_expression: self.cron_expression,
            next_run_time,
            status: ScheduleStatus::Pending,
            retries: 0,
            retry_limit: self.retry_limit.unwrap_or(DEFAULT_RETRY_LIMIT),
            retry_after_seconds: self
                .retry_after_seconds
                .unwrap_or(DEFAULT_RETRY_AFTER_SECONDS),
            webhook_retry_count: 0,
            webhook_retry_limit: self
                .webhook_retry_limit
                .unwrap_or(DEFAULT_WEBHOOK_RETRY_LIMIT),
            webhook_retry_after_seconds: self
                .webhook_retry_after_seconds
                .unwrap_or(DEFAULT_WEBHOOK_RETRY_AFTER_SECONDS),
            run_count: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Builds the next-child record for a firing cron schedule.
///
/// The child gets a fresh id, pending status, zeroed counters, the computed
/// occurrence as both `schedule_time` and `next_run_time`, and the original
/// expression so the chain continues.
///
/// # Errors
///
/// Returns an invalid-cron error when the parent's expression no longer
/// parses, or a no-upcoming-occurrence error when it never fires again.
pub fn rearm_from(
    parent: &ScheduleRecord,
    expression: &str,
    now: DateTime<Utc>,
) -> Result<ScheduleRecord, ScheduleError> {
    let next = CronSchedule::parse(expression)?.next_after(now)?;

    Ok(ScheduleRecord {
        id: ScheduleId::new(),
        webhook_url: parent.webhook_url.clone(),
        method: parent.method,
        payload: parent.payload.clone(),
        schedule_time: Some(next),
        cron_expression: Some(expression.to_string()),
        next_run_time: next,
        status: ScheduleStatus::Pending,
        retries: 0,
        retry_limit: parent.retry_limit,
        retry_after_seconds: parent.retry_after_seconds,
        webhook_retry_count: 0,
        webhook_retry_limit: parent.webhook_retry_limit,
        webhook_retry_after_seconds: parent.webhook_retry_after_seconds,
        run_count: 0,
        created_at: now,
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn one_shot_draft_uses_schedule_time() {
        let now = Utc::now();
        let at = now + Duration::seconds(10);
        let record = ScheduleDraft::new("https://example.com/h", HttpMethod::Post, "p")
            .at(at)
            .build(now)
            .expect("should build");

        assert_eq!(record.next_run_time, at);
        assert_eq!(record.schedule_time, Some(at));
        assert_eq!(record.status, ScheduleStatus::Pending);
        assert_eq!(record.retry_limit, DEFAULT_RETRY_LIMIT);
        assert_eq!(record.retry_after_seconds, DEFAULT_RETRY_AFTER_SECONDS);
        assert_eq!(record.run_count, 0);
    }

    #[test]
    fn cron_draft_derives_next_run_time() {
        let now = Utc::now();
        let record = ScheduleDraft::new("https://example.com/h", HttpMethod::Get, "p")
            .cron("*/1 * * * *")
            .build(now)
            .expect("should build");

        assert!(record.next_run_time > now);
        assert_eq!(record.cron_expression.as_deref(), Some("*/1 * * * *"));
        assert!(record.schedule_time.is_none());
    }

    #[test]
    fn missing_trigger_is_rejected() {
        let err = ScheduleDraft::new("https://example.com/h", HttpMethod::Post, "p")
            .build(Utc::now())
            .unwrap_err();
        assert!(matches!(err, ScheduleError::MissingTrigger));
    }

    #[test]
    fn conflicting_triggers_are_rejected() {
        let err = ScheduleDraft::new("https://example.com/h", HttpMethod::Post, "p")
            .at(Utc::now())
            .cron("* * * * *")
            .build(Utc::now())
            .unwrap_err();
        assert!(matches!(err, ScheduleError::ConflictingTriggers));
    }

    #[test]
    fn overrides_replace_defaults_only_when_set() {
        let now = Utc::now();
        let record = ScheduleDraft::new("https://example.com/h", HttpMethod::Post, "p")
            .at(now + Duration::seconds(5))
            .retry_limit(7)
            .webhook_retry_after_seconds(1)
            .build(now)
            .expect("should build");

        assert_eq!(record.retry_limit, 7);
        assert_eq!(record.webhook_retry_after_seconds, 1);
        // untouched fields keep defaults
        assert_eq!(record.retry_after_seconds, DEFAULT_RETRY_AFTER_SECONDS);
        assert_eq!(record.webhook_retry_limit, DEFAULT_WEBHOOK_RETRY_LIMIT);
    }

    #[test]
    fn rearm_spawns_fresh_child_with_preserved_expression() {
        let now = Utc::now();
        let mut parent = ScheduleDraft::new("https://example.com/h", HttpMethod::Post, "p")
            .cron("*/1 * * * *")
            .retry_limit(5)
            .build(now)
            .expect("should build");
        parent.retries = 2;
        parent.run_count = 4;

        let child = rearm_from(&parent, "*/1 * * * *", now).expect("should rearm");

        assert_ne!(child.id, parent.id);
        assert_eq!(child.status, ScheduleStatus::Pending);
        assert_eq!(child.retries, 0);
        assert_eq!(child.run_count, 0);
        assert_eq!(child.retry_limit, 5);
        assert_eq!(child.cron_expression.as_deref(), Some("*/1 * * * *"));
        assert_eq!(child.schedule_time, Some(child.next_run_time));
        assert!(child.next_run_time > parent.next_run_time || child.next_run_time > now);
    }

    #[test]
    fn rearm_rejects_invalid_expression() {
        let now = Utc::now();
        let parent = ScheduleDraft::new("https://example.com/h", HttpMethod::Post, "p")
            .at(now)
            .build(now)
            .expect("should build");

        assert!(rearm_from(&parent, "not cron", now).is_err());
    }
}
