//! Schedule domain model for the punctual webhook scheduler.
//!
//! This crate provides:
//!
//! - **Record**: the `ScheduleRecord` entity and its status state machine
//! - **Draft**: explicit default-overlay builder and cron re-arm construction
//! - **Cron**: 5-field cron parsing and next-occurrence computation

pub mod cron;
pub mod draft;
pub mod error;
pub mod record;

pub use self::cron::{validate_cron, CronSchedule};
pub use draft::{rearm_from, ScheduleDraft};
pub use error::ScheduleError;
pub use record::{ScheduleRecord, ScheduleStatus};
