//! Error types for the schedule domain crate.

use std::fmt;

/// Errors from building or evaluating schedules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Neither a schedule time nor a cron expression was provided.
    MissingTrigger,
    /// Both a schedule time and a cron expression were provided.
    ConflictingTriggers,
    /// The cron expression failed to parse.
    InvalidCronExpression { expression: String, reason: String },
    /// The cron expression has no occurrence after the given instant.
    NoUpcomingOccurrence { expression: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTrigger => {
                write!(f, "either schedule_time or cron_expression must be provided")
            }
            Self::ConflictingTriggers => {
                write!(f, "schedule_time and cron_expression cannot both be set")
            }
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::NoUpcomingOccurrence { expression } => {
                write!(f, "cron expression '{expression}' has no upcoming occurrence")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}
