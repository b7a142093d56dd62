//! Producer: durable dispatch promotion.
//!
//! Two tickers drive the producer. The publish tick claims due records into
//! `processing` and expedites them over the bus; the reap tick force-fails
//! work that has been stuck past the backward claim window. The store claim
//! is the only de-duplication point, so any number of producers can run.

use crate::config::ProducerConfig;
use chrono::{DateTime, Utc};
use punctual_bus::SchedulePublisher;
use punctual_cache::DispatchCache;
use punctual_core::ScheduleId;
use punctual_schedule::ScheduleStatus;
use punctual_store::{ScheduleStore, StoreError};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The promotion/reaping process.
pub struct Producer<S, B, C> {
    store: Arc<S>,
    publisher: Arc<B>,
    cache: Arc<C>,
    config: ProducerConfig,
}

impl<S, B, C> Producer<S, B, C>
where
    S: ScheduleStore,
    B: SchedulePublisher,
    C: DispatchCache,
{
    /// Creates a producer over the given backends.
    pub fn new(store: Arc<S>, publisher: Arc<B>, cache: Arc<C>, config: ProducerConfig) -> Self {
        Self {
            store,
            publisher,
            cache,
            config,
        }
    }

    /// Runs both tickers until the token is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        let mut publish_tick = tokio::time::interval(self.config.fetch_window);
        publish_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reap_tick = tokio::time::interval(self.config.reap_interval);
        reap_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("producer started");
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    info!("producer stopping");
                    return;
                }
                _ = publish_tick.tick() => {
                    match self.tick_publish(Utc::now()).await {
                        Ok(0) => {}
                        Ok(count) => debug!(published = count, "promoted due schedules"),
                        Err(e) => warn!(error = %e, "publish tick aborted"),
                    }
                }
                _ = reap_tick.tick() => {
                    match self.tick_reap(Utc::now()).await {
                        Ok(0) => {}
                        Ok(count) => info!(reaped = count, "archived stuck schedules"),
                        Err(e) => warn!(error = %e, "reap tick aborted"),
                    }
                }
            }
        }
    }

    /// Claims due records and publishes them onto the bus.
    ///
    /// Store errors abort the tick without side effects; publish errors are
    /// logged per record, because the claimed `processing` state plus the
    /// backward window guarantee republish on a later tick.
    ///
    /// # Errors
    ///
    /// Returns the store error that aborted the tick.
    pub async fn tick_publish(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let claimed = self
            .store
            .claim_due(
                now,
                self.config.promote_horizon,
                self.config.backward_window,
                self.config.max_fetch_per_window,
            )
            .await?;

        if claimed.is_empty() {
            return Ok(0);
        }

        let mut published: Vec<ScheduleId> = Vec::with_capacity(claimed.len());
        for record in claimed {
            // The hint only suppresses pre-load duplicates. A record already
            // past due must always republish: it is either a retry requeue
            // or work a consumer dropped.
            if record.next_run_time > now {
                match self.cache.is_in_queue(record.id).await {
                    Ok(true) => {
                        debug!(schedule_id = %record.id, "already promoted, skipping");
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => debug!(error = %e, "in-queue check failed, promoting anyway"),
                }
            }

            match self.publisher.publish(&record).await {
                Ok(()) => {
                    debug!(
                        schedule_id = %record.id,
                        next_run = %record.next_run_time,
                        "published schedule"
                    );
                    published.push(record.id);
                }
                Err(e) => {
                    warn!(
                        schedule_id = %record.id,
                        error = %e,
                        "publish failed, backward window will recover"
                    );
                }
            }
        }

        if !published.is_empty() {
            if let Err(e) = self
                .cache
                .mark_in_queue(&published, self.config.in_queue_ttl)
                .await
            {
                debug!(error = %e, "in-queue hint update failed");
            }
        }

        Ok(published.len())
    }

    /// Archives every record stuck inside the reap window as failed.
    ///
    /// # Errors
    ///
    /// Returns the store error that aborted the tick.
    pub async fn tick_reap(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let stuck = self
            .store
            .find_stuck(now, self.config.reap_grace, self.config.reap_stale)
            .await?;

        let count = stuck.len();
        for record in stuck {
            warn!(
                schedule_id = %record.id,
                status = record.status.as_str(),
                next_run = %record.next_run_time,
                "reaping stuck schedule"
            );
            self.store.archive(record.id, ScheduleStatus::Failed).await?;
        }

        Ok(count)
    }
}
