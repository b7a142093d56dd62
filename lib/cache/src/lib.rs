//! Ephemeral cache integration for the punctual webhook scheduler.
//!
//! This crate provides:
//!
//! - **DispatchCache**: TTL-bounded processed / in-queue id sets
//! - **Redis**: the production backend
//! - **Memory**: per-entry-expiry fake for tests

pub mod error;
pub mod memory;
pub mod redis;
pub mod traits;

pub use error::CacheError;
pub use memory::InMemoryDispatchCache;
pub use self::redis::RedisDispatchCache;
pub use traits::DispatchCache;
