//! Ingestion HTTP API for the punctual webhook scheduler.
//!
//! This crate provides:
//!
//! - **Routes**: `POST /schedule` and `POST /webhook/verify`
//! - **Time parsing**: the `TimeParser` seam with a chat-completions-backed
//!   implementation for `time_as_text`
//!
//! Validated records enter the store as `pending`; everything downstream is
//! the engine's responsibility.

pub mod error;
pub mod routes;
pub mod timeparse;

pub use error::ApiError;
pub use routes::{router, ApiContext, ScheduleRequest, ScheduleResponse, VerifyRequest};
pub use timeparse::{LlmTimeParser, ParsedSchedule, TimeParseError, TimeParser};
