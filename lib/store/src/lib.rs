//! Durable state storage for the punctual webhook scheduler.
//!
//! This crate provides:
//!
//! - **ScheduleStore**: the atomic-update interface every record mutation
//!   goes through, with PostgreSQL and in-memory implementations
//! - **VerifiedWebhookStore**: one-time webhook verification records
//!
//! All coordination between producers, consumers, and dispatcher workers
//! rests on the conditional updates defined here; there is no client-side
//! locking.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod schedule_store;
pub mod webhooks;

pub use error::StoreError;
pub use memory::InMemoryScheduleStore;
pub use postgres::{PostgresScheduleStore, PostgresVerifiedWebhookStore};
pub use schedule_store::ScheduleStore;
pub use webhooks::{InMemoryVerifiedWebhookStore, VerifiedWebhookStore};
