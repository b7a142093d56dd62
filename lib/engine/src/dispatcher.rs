//! Dispatcher: webhook execution, retry, recurrence, archival.
//!
//! A worker receiving a due record revalidates it against the store, takes
//! the `in-progress` transition (awaited before the HTTP call, so the claim
//! is durable), re-arms cron recurrences, decrypts the payload, invokes the
//! target, and applies the response policy:
//!
//! - 2xx completes and archives the record
//! - retryable statuses (408, 429, 500, 502, 503, 504) drive the inner
//!   webhook-retry loop, then fall through to the scheduler-level policy
//! - any other status is a permanent failure and archives immediately
//! - transport errors go straight to the scheduler-level policy
//!
//! Nothing here returns an error to the worker loop; every failure is
//! logged and resolved through the store.

use crate::config::DispatcherConfig;
use chrono::{Duration as ChronoDuration, Utc};
use punctual_cache::DispatchCache;
use punctual_codec::PayloadCipher;
use punctual_core::HttpMethod;
use punctual_schedule::{rearm_from, ScheduleError, ScheduleRecord, ScheduleStatus};
use punctual_store::{ScheduleStore, StoreError};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of one webhook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WebhookOutcome {
    /// 2xx response.
    Delivered(u16),
    /// A status worth retrying in place.
    Retryable(u16),
    /// A status that will not improve with retries.
    Permanent(u16),
    /// The call never produced a response.
    Transport(String),
}

fn classify(status: StatusCode) -> WebhookOutcome {
    let code = status.as_u16();
    if status.is_success() {
        WebhookOutcome::Delivered(code)
    } else {
        match code {
            408 | 429 | 500 | 502 | 503 | 504 => WebhookOutcome::Retryable(code),
            _ => WebhookOutcome::Permanent(code),
        }
    }
}

#[derive(Debug)]
enum RearmError {
    Schedule(ScheduleError),
    Store(StoreError),
}

impl fmt::Display for RearmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schedule(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl From<ScheduleError> for RearmError {
    fn from(e: ScheduleError) -> Self {
        Self::Schedule(e)
    }
}

impl From<StoreError> for RearmError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Executes due schedule records.
pub struct Dispatcher<S, C> {
    store: Arc<S>,
    cache: Arc<C>,
    cipher: Arc<PayloadCipher>,
    http: reqwest::Client,
    config: DispatcherConfig,
}

impl<S, C> Dispatcher<S, C>
where
    S: ScheduleStore,
    C: DispatchCache,
{
    /// Creates a dispatcher sharing the given HTTP client.
    pub fn new(
        store: Arc<S>,
        cache: Arc<C>,
        cipher: Arc<PayloadCipher>,
        http: reqwest::Client,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            cache,
            cipher,
            http,
            config,
        }
    }

    /// Processes one due record end to end.
    pub async fn dispatch(&self, record: ScheduleRecord) {
        let id = record.id;

        // Replay suppression: a bus redelivery after completion is expected
        // and harmless.
        match self.cache.is_processed(id).await {
            Ok(true) => {
                debug!(schedule_id = %id, "already completed, skipping replay");
                return;
            }
            Ok(false) => {}
            Err(e) => debug!(schedule_id = %id, error = %e, "processed check failed"),
        }

        // Revalidate against the canonical record.
        let current = match self.store.find(id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                debug!(schedule_id = %id, "record gone, skipping");
                return;
            }
            Err(e) => {
                warn!(schedule_id = %id, error = %e, "revalidation failed");
                return;
            }
        };
        if current.status != ScheduleStatus::Processing {
            debug!(
                schedule_id = %id,
                status = current.status.as_str(),
                "not in processing state, skipping"
            );
            return;
        }

        // The in-progress transition is awaited before the webhook call so
        // the run is durably claimed; the predicate loses gracefully when
        // another worker got here first.
        let mut active = match self.store.begin_attempt(id, Utc::now()).await {
            Ok(Some(active)) => active,
            Ok(None) => {
                debug!(schedule_id = %id, "another worker took this record");
                return;
            }
            Err(e) => {
                warn!(schedule_id = %id, error = %e, "in-progress transition failed");
                return;
            }
        };

        // Recurrence spawns the next child before this run resolves.
        if let Some(expression) = active.cron_expression.clone() {
            if let Err(e) = self.rearm(&active, &expression).await {
                warn!(schedule_id = %id, error = %e, "cron re-arm failed, archiving as failed");
                self.archive(id, ScheduleStatus::Failed).await;
                return;
            }
        }

        let body = match self.cipher.decrypt(&active.payload) {
            Ok(body) => body,
            Err(e) => {
                error!(
                    schedule_id = %id,
                    error = %e,
                    "payload decrypt failed, leaving record for the reaper"
                );
                return;
            }
        };

        loop {
            match self.call_webhook(&active, &body).await {
                WebhookOutcome::Delivered(status) => {
                    info!(schedule_id = %id, status, "webhook delivered");
                    self.mark_processed(&active).await;
                    return;
                }
                WebhookOutcome::Retryable(status) => {
                    if active.webhook_retries_exhausted() {
                        warn!(
                            schedule_id = %id,
                            status,
                            webhook_retries = active.webhook_retry_count,
                            "webhook retries exhausted"
                        );
                        self.apply_retry_policy(&active).await;
                        return;
                    }

                    debug!(
                        schedule_id = %id,
                        status,
                        delay_seconds = active.webhook_retry_after_seconds,
                        "retryable status, retrying webhook"
                    );
                    tokio::time::sleep(Duration::from_secs(
                        u64::from(active.webhook_retry_after_seconds),
                    ))
                    .await;

                    match self.store.bump_webhook_retry(id).await {
                        Ok(Some(updated)) => active = updated,
                        Ok(None) => {
                            debug!(schedule_id = %id, "record disappeared mid-retry");
                            return;
                        }
                        Err(e) => {
                            warn!(schedule_id = %id, error = %e, "webhook retry update failed");
                            return;
                        }
                    }
                }
                WebhookOutcome::Permanent(status) => {
                    warn!(
                        schedule_id = %id,
                        status,
                        "non-retryable response, archiving as failed"
                    );
                    self.archive(id, ScheduleStatus::Failed).await;
                    return;
                }
                WebhookOutcome::Transport(reason) => {
                    warn!(schedule_id = %id, error = %reason, "webhook transport error");
                    self.apply_retry_policy(&active).await;
                    return;
                }
            }
        }
    }

    async fn call_webhook(&self, record: &ScheduleRecord, body: &[u8]) -> WebhookOutcome {
        let method = match record.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };

        let result = self
            .http
            .request(method, &record.webhook_url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .timeout(self.config.http_timeout)
            .send()
            .await;

        match result {
            Ok(response) => classify(response.status()),
            Err(e) => WebhookOutcome::Transport(e.to_string()),
        }
    }

    /// Scheduler-level retry policy.
    ///
    /// When one more retry would reach the limit the record is archived as
    /// failed, so `retries` never exceeds `retry_limit`; otherwise it is
    /// requeued as pending for the producer to re-promote.
    async fn apply_retry_policy(&self, record: &ScheduleRecord) {
        if record.retry_budget_exhausted() {
            warn!(
                schedule_id = %record.id,
                retries = record.retries,
                retry_limit = record.retry_limit,
                "retry limit reached, archiving as failed"
            );
            self.archive(record.id, ScheduleStatus::Failed).await;
            return;
        }

        let next_run = Utc::now() + ChronoDuration::seconds(i64::from(record.retry_after_seconds));
        match self.store.record_retry(record.id, next_run).await {
            Ok(()) => info!(
                schedule_id = %record.id,
                retry = record.retries + 1,
                next_run = %next_run,
                "requeued for retry"
            ),
            Err(e) => warn!(schedule_id = %record.id, error = %e, "retry requeue failed"),
        }
    }

    async fn rearm(&self, parent: &ScheduleRecord, expression: &str) -> Result<(), RearmError> {
        let child = rearm_from(parent, expression, Utc::now())?;
        self.store.insert(&child).await?;
        info!(
            schedule_id = %parent.id,
            child_id = %child.id,
            next_run = %child.next_run_time,
            "re-armed cron schedule"
        );
        Ok(())
    }

    async fn mark_processed(&self, record: &ScheduleRecord) {
        if let Err(e) = self
            .cache
            .mark_processed(record.id, self.config.processed_ttl)
            .await
        {
            debug!(schedule_id = %record.id, error = %e, "processed set update failed");
        }
        self.archive(record.id, ScheduleStatus::Completed).await;
    }

    async fn archive(&self, id: punctual_core::ScheduleId, status: ScheduleStatus) {
        if let Err(e) = self.store.archive(id, status).await {
            error!(
                schedule_id = %id,
                status = status.as_str(),
                error = %e,
                "archive failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::StatusCode as AxumStatus;
    use axum::Router;
    use punctual_cache::InMemoryDispatchCache;
    use punctual_schedule::ScheduleDraft;
    use punctual_store::InMemoryScheduleStore;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Target {
        script: Mutex<VecDeque<u16>>,
        hits: AtomicUsize,
        bodies: Mutex<Vec<Vec<u8>>>,
    }

    async fn respond(State(target): State<Arc<Target>>, body: Bytes) -> AxumStatus {
        target.hits.fetch_add(1, Ordering::SeqCst);
        target.bodies.lock().unwrap().push(body.to_vec());
        let code = target.script.lock().unwrap().pop_front().unwrap_or(200);
        AxumStatus::from_u16(code).expect("valid status in script")
    }

    /// Serves the scripted statuses on an ephemeral port; once the script
    /// runs out every call returns 200.
    async fn spawn_target(script: Vec<u16>) -> (String, Arc<Target>) {
        let target = Arc::new(Target {
            script: Mutex::new(script.into()),
            hits: AtomicUsize::new(0),
            bodies: Mutex::new(Vec::new()),
        });

        let app = Router::new().fallback(respond).with_state(target.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("ephemeral bind");
        let url = format!("http://{}", listener.local_addr().expect("local addr"));
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test server");
        });

        (url, target)
    }

    fn test_cipher() -> Arc<PayloadCipher> {
        Arc::new(PayloadCipher::new(b"0123456789abcdef0123456789abcdef").expect("valid key"))
    }

    struct Harness {
        store: Arc<InMemoryScheduleStore>,
        cache: Arc<InMemoryDispatchCache>,
        dispatcher: Dispatcher<InMemoryScheduleStore, InMemoryDispatchCache>,
        cipher: Arc<PayloadCipher>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryScheduleStore::new());
        let cache = Arc::new(InMemoryDispatchCache::new());
        let cipher = test_cipher();
        let dispatcher = Dispatcher::new(
            store.clone(),
            cache.clone(),
            cipher.clone(),
            reqwest::Client::new(),
            DispatcherConfig::default(),
        );
        Harness {
            store,
            cache,
            dispatcher,
            cipher,
        }
    }

    /// Builds a record already claimed into `processing`, as a worker
    /// receives it.
    async fn claimed_record(harness: &Harness, url: &str, payload: &[u8]) -> ScheduleRecord {
        let now = Utc::now();
        let mut record = ScheduleDraft::new(url, HttpMethod::Post, harness.cipher.encrypt(payload))
            .at(now)
            .webhook_retry_after_seconds(0)
            .build(now)
            .expect("valid draft");
        record.status = ScheduleStatus::Processing;
        harness.store.insert(&record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn successful_delivery_completes_and_archives() {
        let harness = harness();
        let (url, target) = spawn_target(vec![200]).await;
        let record = claimed_record(&harness, &url, br#"{"k":"v"}"#).await;

        harness.dispatcher.dispatch(record.clone()).await;

        assert_eq!(target.hits.load(Ordering::SeqCst), 1);
        // the target saw the decrypted payload
        assert_eq!(target.bodies.lock().unwrap()[0], br#"{"k":"v"}"#);
        // live record gone, archive completed, run counted
        assert!(harness.store.find(record.id).await.unwrap().is_none());
        let archived = harness.store.find_archived(record.id).await.unwrap().unwrap();
        assert_eq!(archived.status, ScheduleStatus::Completed);
        assert_eq!(archived.run_count, 1);
        assert!(harness.cache.is_processed(record.id).await.unwrap());
    }

    #[tokio::test]
    async fn skips_records_not_in_processing() {
        let harness = harness();
        let (url, target) = spawn_target(vec![200]).await;

        let now = Utc::now();
        let record = ScheduleDraft::new(&url, HttpMethod::Post, harness.cipher.encrypt(b"x"))
            .at(now)
            .build(now)
            .expect("valid draft");
        harness.store.insert(&record).await.unwrap();

        harness.dispatcher.dispatch(record.clone()).await;

        assert_eq!(target.hits.load(Ordering::SeqCst), 0);
        let untouched = harness.store.find(record.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, ScheduleStatus::Pending);
        assert_eq!(untouched.run_count, 0);
    }

    #[tokio::test]
    async fn replay_of_processed_record_is_suppressed() {
        let harness = harness();
        let (url, target) = spawn_target(vec![200]).await;
        let record = claimed_record(&harness, &url, b"x").await;

        harness
            .cache
            .mark_processed(record.id, Duration::from_secs(60))
            .await
            .unwrap();
        harness.dispatcher.dispatch(record).await;

        assert_eq!(target.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retryable_statuses_drive_the_inner_loop() {
        let harness = harness();
        // 503 twice, then success
        let (url, target) = spawn_target(vec![503, 503, 200]).await;
        let record = claimed_record(&harness, &url, b"x").await;

        harness.dispatcher.dispatch(record.clone()).await;

        assert_eq!(target.hits.load(Ordering::SeqCst), 3);
        let archived = harness.store.find_archived(record.id).await.unwrap().unwrap();
        assert_eq!(archived.status, ScheduleStatus::Completed);
        assert_eq!(archived.webhook_retry_count, 2);
    }

    #[tokio::test]
    async fn exhausted_inner_loop_requeues_for_outer_retry() {
        let harness = harness();
        let (url, target) = spawn_target(vec![500, 500, 500, 500, 500]).await;
        let now = Utc::now();
        let mut record = ScheduleDraft::new(&url, HttpMethod::Post, harness.cipher.encrypt(b"x"))
            .at(now)
            .webhook_retry_limit(1)
            .webhook_retry_after_seconds(0)
            .build(now)
            .expect("valid draft");
        record.status = ScheduleStatus::Processing;
        harness.store.insert(&record).await.unwrap();

        harness.dispatcher.dispatch(record.clone()).await;

        // initial call + 1 inner retry
        assert_eq!(target.hits.load(Ordering::SeqCst), 2);
        let requeued = harness.store.find(record.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, ScheduleStatus::Pending);
        assert_eq!(requeued.retries, 1);
        assert!(requeued.next_run_time > now);
    }

    #[tokio::test]
    async fn non_retryable_status_archives_immediately() {
        let harness = harness();
        let (url, target) = spawn_target(vec![404]).await;
        let record = claimed_record(&harness, &url, b"x").await;

        harness.dispatcher.dispatch(record.clone()).await;

        // a single call, no retries of any kind
        assert_eq!(target.hits.load(Ordering::SeqCst), 1);
        assert!(harness.store.find(record.id).await.unwrap().is_none());
        let archived = harness.store.find_archived(record.id).await.unwrap().unwrap();
        assert_eq!(archived.status, ScheduleStatus::Failed);
    }

    #[tokio::test]
    async fn transport_error_applies_outer_retry() {
        let harness = harness();
        // nothing listens here
        let record = claimed_record(&harness, "http://127.0.0.1:1", b"x").await;

        harness.dispatcher.dispatch(record.clone()).await;

        let requeued = harness.store.find(record.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, ScheduleStatus::Pending);
        assert_eq!(requeued.retries, 1);
    }

    #[tokio::test]
    async fn final_retry_archives_as_failed() {
        let harness = harness();
        let now = Utc::now();
        let mut record =
            ScheduleDraft::new("http://127.0.0.1:1", HttpMethod::Post, harness.cipher.encrypt(b"x"))
                .at(now)
                .retry_limit(1)
                .build(now)
                .expect("valid draft");
        record.status = ScheduleStatus::Processing;
        harness.store.insert(&record).await.unwrap();

        harness.dispatcher.dispatch(record.clone()).await;

        assert!(harness.store.find(record.id).await.unwrap().is_none());
        let archived = harness.store.find_archived(record.id).await.unwrap().unwrap();
        assert_eq!(archived.status, ScheduleStatus::Failed);
        assert!(archived.retries <= archived.retry_limit);
    }

    #[tokio::test]
    async fn cron_record_spawns_next_child() {
        let harness = harness();
        let (url, _target) = spawn_target(vec![200]).await;
        let now = Utc::now();
        let mut record = ScheduleDraft::new(&url, HttpMethod::Post, harness.cipher.encrypt(b"x"))
            .cron("*/1 * * * *")
            .build(now)
            .expect("valid draft");
        record.status = ScheduleStatus::Processing;
        harness.store.insert(&record).await.unwrap();

        harness.dispatcher.dispatch(record.clone()).await;

        // parent archived as completed
        let archived = harness.store.find_archived(record.id).await.unwrap().unwrap();
        assert_eq!(archived.status, ScheduleStatus::Completed);

        // a fresh pending child with a later occurrence exists
        let children = harness.store.live_records();
        assert_eq!(children.len(), 1);
        let child = &children[0];
        assert_ne!(child.id, record.id);
        assert_eq!(child.status, ScheduleStatus::Pending);
        assert_eq!(child.cron_expression.as_deref(), Some("*/1 * * * *"));
        assert!(child.next_run_time > record.next_run_time);
        assert_eq!(child.run_count, 0);
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify(StatusCode::OK), WebhookOutcome::Delivered(200));
        assert_eq!(classify(StatusCode::NO_CONTENT), WebhookOutcome::Delivered(204));
        for code in [408u16, 429, 500, 502, 503, 504] {
            assert_eq!(
                classify(StatusCode::from_u16(code).unwrap()),
                WebhookOutcome::Retryable(code)
            );
        }
        assert_eq!(classify(StatusCode::NOT_FOUND), WebhookOutcome::Permanent(404));
        assert_eq!(classify(StatusCode::UNAUTHORIZED), WebhookOutcome::Permanent(401));
        assert_eq!(
            classify(StatusCode::NOT_IMPLEMENTED),
            WebhookOutcome::Permanent(501)
        );
    }
}
