//! Cron expression parsing and next-occurrence computation.

use crate::error::ScheduleError;
use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;

/// A validated 5-field standard cron expression (minute, hour, day-of-month,
/// month, day-of-week).
///
/// The `cron` crate expects a seconds field, so the expression is prefixed
/// with `0` before parsing; callers always supply the 5-field form.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    /// Parses a 5-field cron expression.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidCronExpression`] if the expression
    /// does not have 5 fields or does not parse.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(ScheduleError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: format!("expected 5 fields, got {}", parts.len()),
            });
        }

        let with_seconds = format!("0 {}", parts.join(" "));
        let schedule =
            Schedule::from_str(&with_seconds).map_err(|e| ScheduleError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// Returns the original 5-field expression.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Computes the first occurrence strictly after `after + 1s`.
    ///
    /// The one second skew matches the re-arm semantics: a record firing at
    /// the scheduled instant must not re-arm onto that same instant.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::NoUpcomingOccurrence`] when the expression
    /// never fires again (exhausted date ranges).
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        self.schedule
            .after(&(after + Duration::seconds(1)))
            .next()
            .ok_or_else(|| ScheduleError::NoUpcomingOccurrence {
                expression: self.expression.clone(),
            })
    }
}

/// Validates a 5-field cron expression without keeping the parse result.
///
/// # Errors
///
/// Returns [`ScheduleError::InvalidCronExpression`] on malformed input.
pub fn validate_cron(expression: &str) -> Result<(), ScheduleError> {
    CronSchedule::parse(expression).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_standard_five_field_expression() {
        let schedule = CronSchedule::parse("*/5 * * * *").expect("should parse");
        assert_eq!(schedule.expression(), "*/5 * * * *");
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = CronSchedule::parse("* * *").unwrap_err();
        assert!(err.to_string().contains("5 fields"));
    }

    #[test]
    fn rejects_garbage_fields() {
        assert!(CronSchedule::parse("a b c d e").is_err());
    }

    #[test]
    fn next_is_strictly_future() {
        let schedule = CronSchedule::parse("* * * * *").expect("should parse");
        let now = Utc::now();
        let next = schedule.next_after(now).expect("should have next");
        assert!(next > now);
    }

    #[test]
    fn next_lands_on_the_minute() {
        let schedule = CronSchedule::parse("*/1 * * * *").expect("should parse");
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        let next = schedule.next_after(at).expect("should have next");
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 12, 31, 0).unwrap());
    }

    #[test]
    fn daily_expression_advances_a_day() {
        let schedule = CronSchedule::parse("0 7 * * *").expect("should parse");
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 7, 0, 0).unwrap();
        let next = schedule.next_after(at).expect("should have next");
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).unwrap());
    }

    #[test]
    fn validate_cron_accepts_and_rejects() {
        assert!(validate_cron("0 7 * * 1-5").is_ok());
        assert!(validate_cron("61 * * * *").is_err());
    }
}
