//! Scheduling engine for the punctual webhook scheduler.
//!
//! This crate provides the three cooperating components of the pipeline:
//!
//! - **Producer**: claims due records into `processing` and expedites them
//!   over the bus; reaps stuck work
//! - **Consumer**: absorbs promoted records into a time-ordered queue and
//!   releases each at its due instant
//! - **Dispatcher**: invokes the target webhook with retry, cron re-arming,
//!   and archival
//!
//! The engine is written against the store, bus, and cache traits; the
//! binaries wire in the production backends.

pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod ingress;
pub mod producer;
pub mod queue;
pub mod release;

pub use config::{ConsumerConfig, DispatcherConfig, ProducerConfig};
pub use consumer::run_consumer;
pub use dispatcher::Dispatcher;
pub use ingress::run_ingress;
pub use producer::Producer;
pub use queue::{DispatchQueue, QueueStep};
pub use release::run_release_loop;
