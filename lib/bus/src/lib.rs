//! Message bus integration for the punctual webhook scheduler.
//!
//! This crate provides:
//!
//! - **Traits**: `SchedulePublisher` and `ScheduleSource`, the seam between
//!   the engine and the broker
//! - **NATS**: JetStream work-queue stream + shared durable consumer
//! - **Memory**: channel-backed bus for tests

pub mod error;
pub mod memory;
pub mod nats;
pub mod traits;

pub use error::BusError;
pub use memory::{in_memory_bus, InMemorySchedulePublisher, InMemoryScheduleSource};
pub use nats::{NatsBusConfig, NatsSchedulePublisher, NatsScheduleSource};
pub use traits::{MessageAck, NoopAck, ScheduleDelivery, SchedulePublisher, ScheduleSource};
