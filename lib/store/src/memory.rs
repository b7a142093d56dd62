//! In-memory schedule store.
//!
//! Mirrors the PostgreSQL semantics under a single lock, for engine tests
//! and local experimentation.

use crate::error::StoreError;
use crate::schedule_store::ScheduleStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use punctual_core::ScheduleId;
use punctual_schedule::{ScheduleRecord, ScheduleStatus};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    live: HashMap<ScheduleId, ScheduleRecord>,
    archives: HashMap<ScheduleId, ScheduleRecord>,
}

/// In-memory schedule store with the same atomic semantics as the SQL store.
#[derive(Default)]
pub struct InMemoryScheduleStore {
    inner: Mutex<Inner>,
}

impl InMemoryScheduleStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Number of archived records.
    #[must_use]
    pub fn archived_count(&self) -> usize {
        self.lock().archives.len()
    }

    /// Snapshot of all live records, unordered.
    #[must_use]
    pub fn live_records(&self) -> Vec<ScheduleRecord> {
        self.lock().live.values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("schedule store lock poisoned")
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn insert(&self, record: &ScheduleRecord) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.live.contains_key(&record.id) {
            return Err(StoreError::QueryFailed {
                reason: format!("duplicate id {}", record.id),
            });
        }
        inner.live.insert(record.id, record.clone());
        Ok(())
    }

    async fn find(&self, id: ScheduleId) -> Result<Option<ScheduleRecord>, StoreError> {
        Ok(self.lock().live.get(&id).cloned())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        horizon: Duration,
        backward: Duration,
        limit: i64,
    ) -> Result<Vec<ScheduleRecord>, StoreError> {
        let mut inner = self.lock();

        let mut due: Vec<ScheduleId> = inner
            .live
            .values()
            .filter(|r| {
                (r.status == ScheduleStatus::Pending && r.next_run_time <= now + horizon)
                    || (r.status == ScheduleStatus::Processing
                        && r.next_run_time >= now - backward)
            })
            .map(|r| r.id)
            .collect();
        due.sort_by_key(|id| inner.live[id].next_run_time);
        due.truncate(usize::try_from(limit).unwrap_or(usize::MAX));

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            let record = inner.live.get_mut(&id).expect("id collected above");
            record.status = ScheduleStatus::Processing;
            record.updated_at = now;
            claimed.push(record.clone());
        }
        Ok(claimed)
    }

    async fn begin_attempt(
        &self,
        id: ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleRecord>, StoreError> {
        let mut inner = self.lock();
        match inner.live.get_mut(&id) {
            Some(record) if record.status == ScheduleStatus::Processing => {
                record.status = ScheduleStatus::InProgress;
                record.run_count += 1;
                record.webhook_retry_count = 0;
                record.updated_at = now;
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn record_retry(
        &self,
        id: ScheduleId,
        next_run_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(record) = inner.live.get_mut(&id) {
            record.status = ScheduleStatus::Pending;
            record.retries += 1;
            record.next_run_time = next_run_time;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn bump_webhook_retry(
        &self,
        id: ScheduleId,
    ) -> Result<Option<ScheduleRecord>, StoreError> {
        let mut inner = self.lock();
        Ok(inner.live.get_mut(&id).map(|record| {
            record.webhook_retry_count += 1;
            record.updated_at = Utc::now();
            record.clone()
        }))
    }

    async fn archive(
        &self,
        id: ScheduleId,
        final_status: ScheduleStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(mut record) = inner.live.remove(&id) {
            record.status = final_status;
            record.updated_at = Utc::now();
            inner.archives.entry(id).or_insert(record);
        }
        Ok(())
    }

    async fn find_archived(&self, id: ScheduleId) -> Result<Option<ScheduleRecord>, StoreError> {
        Ok(self.lock().archives.get(&id).cloned())
    }

    async fn find_stuck(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
        stale: Duration,
    ) -> Result<Vec<ScheduleRecord>, StoreError> {
        let inner = self.lock();
        let mut stuck: Vec<ScheduleRecord> = inner
            .live
            .values()
            .filter(|r| {
                !r.status.is_terminal()
                    && r.next_run_time >= now - stale
                    && r.next_run_time < now - grace
            })
            .cloned()
            .collect();
        stuck.sort_by_key(|r| r.next_run_time);
        Ok(stuck)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use punctual_core::HttpMethod;
    use punctual_schedule::ScheduleDraft;

    fn record_at(now: DateTime<Utc>, offset_secs: i64) -> ScheduleRecord {
        ScheduleDraft::new("https://example.com/hook", HttpMethod::Post, "payload")
            .at(now + Duration::seconds(offset_secs))
            .build(now)
            .expect("valid draft")
    }

    #[tokio::test]
    async fn claim_picks_pending_within_horizon() {
        let store = InMemoryScheduleStore::new();
        let now = Utc::now();

        let due = record_at(now, 30);
        let distant = record_at(now, 600);
        store.insert(&due).await.unwrap();
        store.insert(&distant).await.unwrap();

        let claimed = store
            .claim_due(now, Duration::minutes(1), Duration::minutes(5), 100)
            .await
            .unwrap();

        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, due.id);
        assert_eq!(claimed[0].status, ScheduleStatus::Processing);
        // the distant record is untouched
        let remaining = store.find(distant.id).await.unwrap().unwrap();
        assert_eq!(remaining.status, ScheduleStatus::Pending);
    }

    #[tokio::test]
    async fn claim_recovers_recent_processing_records() {
        let store = InMemoryScheduleStore::new();
        let now = Utc::now();

        // claimed 2 minutes ago, consumer crashed before in-progress
        let mut dropped = record_at(now, -120);
        dropped.status = ScheduleStatus::Processing;
        store.insert(&dropped).await.unwrap();

        // claimed 7 minutes ago, outside the backward window
        let mut stale = record_at(now, -420);
        stale.status = ScheduleStatus::Processing;
        store.insert(&stale).await.unwrap();

        let claimed = store
            .claim_due(now, Duration::minutes(1), Duration::minutes(5), 100)
            .await
            .unwrap();

        let ids: Vec<ScheduleId> = claimed.iter().map(|r| r.id).collect();
        assert!(ids.contains(&dropped.id));
        assert!(!ids.contains(&stale.id));
    }

    #[tokio::test]
    async fn claim_respects_limit_and_order() {
        let store = InMemoryScheduleStore::new();
        let now = Utc::now();

        let later = record_at(now, 40);
        let sooner = record_at(now, 10);
        store.insert(&later).await.unwrap();
        store.insert(&sooner).await.unwrap();

        let claimed = store
            .claim_due(now, Duration::minutes(1), Duration::minutes(5), 1)
            .await
            .unwrap();

        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, sooner.id);
    }

    #[tokio::test]
    async fn begin_attempt_requires_processing_status() {
        let store = InMemoryScheduleStore::new();
        let now = Utc::now();
        let record = record_at(now, 0);
        store.insert(&record).await.unwrap();

        // still pending: not claimable by a worker
        assert!(store.begin_attempt(record.id, now).await.unwrap().is_none());

        store
            .claim_due(now, Duration::minutes(1), Duration::minutes(5), 10)
            .await
            .unwrap();

        let active = store
            .begin_attempt(record.id, now)
            .await
            .unwrap()
            .expect("should transition");
        assert_eq!(active.status, ScheduleStatus::InProgress);
        assert_eq!(active.run_count, 1);

        // a second worker loses the race
        assert!(store.begin_attempt(record.id, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn begin_attempt_resets_the_inner_retry_budget() {
        let store = InMemoryScheduleStore::new();
        let now = Utc::now();
        let record = record_at(now, 0);
        store.insert(&record).await.unwrap();

        // first attempt exhausts the inner budget, then requeues
        store
            .claim_due(now, Duration::minutes(1), Duration::minutes(5), 10)
            .await
            .unwrap();
        store.begin_attempt(record.id, now).await.unwrap().unwrap();
        store.bump_webhook_retry(record.id).await.unwrap().unwrap();
        store.record_retry(record.id, now).await.unwrap();

        // the second attempt starts with a fresh inner budget
        store
            .claim_due(now, Duration::minutes(1), Duration::minutes(5), 10)
            .await
            .unwrap();
        let second = store
            .begin_attempt(record.id, now)
            .await
            .unwrap()
            .expect("should transition");
        assert_eq!(second.webhook_retry_count, 0);
        assert_eq!(second.retries, 1);
        assert_eq!(second.run_count, 2);
    }

    #[tokio::test]
    async fn record_retry_requeues_as_pending() {
        let store = InMemoryScheduleStore::new();
        let now = Utc::now();
        let record = record_at(now, 0);
        store.insert(&record).await.unwrap();

        let retry_at = now + Duration::seconds(30);
        store.record_retry(record.id, retry_at).await.unwrap();

        let updated = store.find(record.id).await.unwrap().unwrap();
        assert_eq!(updated.status, ScheduleStatus::Pending);
        assert_eq!(updated.retries, 1);
        assert_eq!(updated.next_run_time, retry_at);
    }

    #[tokio::test]
    async fn archive_moves_record_exactly_once() {
        let store = InMemoryScheduleStore::new();
        let now = Utc::now();
        let record = record_at(now, 0);
        store.insert(&record).await.unwrap();

        store
            .archive(record.id, ScheduleStatus::Completed)
            .await
            .unwrap();

        assert!(store.find(record.id).await.unwrap().is_none());
        let archived = store.find_archived(record.id).await.unwrap().unwrap();
        assert_eq!(archived.status, ScheduleStatus::Completed);

        // idempotent replay
        store
            .archive(record.id, ScheduleStatus::Failed)
            .await
            .unwrap();
        let archived = store.find_archived(record.id).await.unwrap().unwrap();
        assert_eq!(archived.status, ScheduleStatus::Completed);
        assert_eq!(store.archived_count(), 1);
    }

    #[tokio::test]
    async fn find_stuck_matches_the_reap_window() {
        let store = InMemoryScheduleStore::new();
        let now = Utc::now();

        let mut stuck = record_at(now, -420); // 7 minutes late
        stuck.status = ScheduleStatus::Processing;
        let mut recent = record_at(now, -120); // inside the grace period
        recent.status = ScheduleStatus::Processing;
        let ancient = record_at(now, -1200); // beyond the stale bound

        store.insert(&stuck).await.unwrap();
        store.insert(&recent).await.unwrap();
        store.insert(&ancient).await.unwrap();

        let found = store
            .find_stuck(now, Duration::minutes(5), Duration::minutes(10))
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stuck.id);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryScheduleStore::new();
        let record = record_at(Utc::now(), 0);
        store.insert(&record).await.unwrap();
        assert!(store.insert(&record).await.is_err());
    }
}
