//! The dispatch cache trait.
//!
//! Two TTL-bounded sets shared between producers and dispatcher workers:
//!
//! - `processed_schedules`: ids that reached `completed`, consulted to
//!   suppress double-completion when the bus replays a record
//! - `in_queue`: ids currently promoted, a best-effort deduplication hint
//!   for the producer's backward window
//!
//! Both sets expire on their own; the cache can never leak and is never
//! authoritative.

use crate::error::CacheError;
use async_trait::async_trait;
use punctual_core::ScheduleId;
use std::time::Duration;

/// Ephemeral set storage for dispatch deduplication.
#[async_trait]
pub trait DispatchCache: Send + Sync {
    /// Adds an id to the processed set.
    async fn mark_processed(&self, id: ScheduleId, ttl: Duration) -> Result<(), CacheError>;

    /// Returns true if the id is in the processed set.
    async fn is_processed(&self, id: ScheduleId) -> Result<bool, CacheError>;

    /// Adds ids to the in-queue set.
    async fn mark_in_queue(&self, ids: &[ScheduleId], ttl: Duration) -> Result<(), CacheError>;

    /// Returns true if the id is in the in-queue set.
    async fn is_in_queue(&self, id: ScheduleId) -> Result<bool, CacheError>;
}
