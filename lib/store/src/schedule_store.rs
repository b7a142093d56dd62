//! The schedule store trait.
//!
//! Every mutation of a `ScheduleRecord` goes through one of these atomic
//! operations; callers never hold locks and never update fields client-side.
//! This abstraction allows the engine to be tested without a database while
//! still supporting the PostgreSQL implementation in production.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use punctual_core::ScheduleId;
use punctual_schedule::{ScheduleRecord, ScheduleStatus};

/// Durable storage for schedule records and their archive.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Persists a new record.
    async fn insert(&self, record: &ScheduleRecord) -> Result<(), StoreError>;

    /// Reads a live record by id.
    async fn find(&self, id: ScheduleId) -> Result<Option<ScheduleRecord>, StoreError>;

    /// Atomically claims due records into `processing` and returns them,
    /// ordered by `next_run_time` ascending.
    ///
    /// Matches either `pending` records due within `now + horizon`, or
    /// `processing` records with `next_run_time >= now - backward` (the
    /// backward window re-covers bus failures and crashed consumers). At
    /// most `limit` records are claimed per call; the claim transition is
    /// the de-duplication point for horizontally scaled producers.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        horizon: Duration,
        backward: Duration,
        limit: i64,
    ) -> Result<Vec<ScheduleRecord>, StoreError>;

    /// Compare-and-set `processing → in-progress`, incrementing `run_count`
    /// and resetting `webhook_retry_count` so every attempt starts with a
    /// fresh inner retry budget.
    ///
    /// Returns the updated record, or `None` when the record is absent or
    /// not in `processing` (another worker already took it).
    async fn begin_attempt(
        &self,
        id: ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleRecord>, StoreError>;

    /// Requeues a record for a scheduler-level retry: increments `retries`,
    /// sets `status = pending` and the new `next_run_time`.
    async fn record_retry(
        &self,
        id: ScheduleId,
        next_run_time: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Increments `webhook_retry_count` and returns the refreshed record,
    /// or `None` when the record is no longer live.
    async fn bump_webhook_retry(
        &self,
        id: ScheduleId,
    ) -> Result<Option<ScheduleRecord>, StoreError>;

    /// Moves a live record to the archive with the given terminal status.
    ///
    /// The insert-into-archive and delete-from-live happen atomically; the
    /// call is idempotent (archiving an already-archived id is a no-op).
    async fn archive(&self, id: ScheduleId, final_status: ScheduleStatus)
        -> Result<(), StoreError>;

    /// Reads an archived record by id.
    async fn find_archived(&self, id: ScheduleId) -> Result<Option<ScheduleRecord>, StoreError>;

    /// Finds stuck records: non-terminal status with `next_run_time` in
    /// `[now - stale, now - grace)`.
    ///
    /// Records older than `stale` are left alone (they were reaped by an
    /// earlier pass or predate it); records younger than `grace` may still
    /// be in flight.
    async fn find_stuck(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
        stale: Duration,
    ) -> Result<Vec<ScheduleRecord>, StoreError>;
}
