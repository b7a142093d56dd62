//! Release loop: fire records at their exact instant.
//!
//! A single task owns the timing decision. It pops everything due and
//! offers each record to the bounded dispatch channel without blocking;
//! when the channel is full the record is dropped and logged, because the
//! producer's backward window will re-promote it. While waiting it sleeps
//! towards the earliest deadline, interruptible by a queue push (an earlier
//! arrival must preempt the timer) and by shutdown.

use crate::queue::{DispatchQueue, QueueStep};
use chrono::Utc;
use punctual_schedule::ScheduleRecord;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs the release loop until shutdown.
pub async fn run_release_loop(
    queue: Arc<DispatchQueue>,
    dispatch_tx: mpsc::Sender<ScheduleRecord>,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            info!("release loop stopping");
            return;
        }

        match queue.next_step(Utc::now()) {
            QueueStep::Due(records) => {
                for record in records {
                    match dispatch_tx.try_send(record) {
                        Ok(()) => {}
                        Err(TrySendError::Full(record)) => {
                            warn!(
                                schedule_id = %record.id,
                                "dispatch channel full, dropping schedule"
                            );
                        }
                        Err(TrySendError::Closed(_)) => {
                            info!("dispatch channel closed, release loop stopping");
                            return;
                        }
                    }
                }
            }
            QueueStep::Wait(wait) => {
                tokio::select! {
                    () = queue.changed() => {}
                    () = tokio::time::sleep(wait) => {}
                    () = token.cancelled() => {
                        info!("release loop stopping");
                        return;
                    }
                }
            }
            QueueStep::Idle => {
                tokio::select! {
                    () = queue.changed() => {}
                    () = token.cancelled() => {
                        info!("release loop stopping");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use punctual_core::HttpMethod;
    use punctual_schedule::ScheduleDraft;
    use std::time::Duration;

    fn record_due_in(millis: i64) -> ScheduleRecord {
        let now = Utc::now();
        ScheduleDraft::new("https://example.com/h", HttpMethod::Post, "p")
            .at(now + ChronoDuration::milliseconds(millis))
            .build(now)
            .expect("valid draft")
    }

    #[tokio::test]
    async fn due_record_is_released_on_time() {
        let queue = Arc::new(DispatchQueue::new());
        let (tx, mut rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let _loop = tokio::spawn(run_release_loop(queue.clone(), tx, token.clone()));

        let record = record_due_in(150);
        let expected_at = record.next_run_time;
        queue.push(record.clone());

        let released = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("should release")
            .expect("channel open");
        let released_at = Utc::now();

        assert_eq!(released.id, record.id);
        // released no earlier than due, and within a second of it
        assert!(released_at >= expected_at - ChronoDuration::milliseconds(20));
        assert!(released_at <= expected_at + ChronoDuration::seconds(1));

        token.cancel();
    }

    #[tokio::test]
    async fn earlier_arrival_preempts_a_pending_timer() {
        let queue = Arc::new(DispatchQueue::new());
        let (tx, mut rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let _loop = tokio::spawn(run_release_loop(queue.clone(), tx, token.clone()));

        // park the loop on a long timer, then push something due sooner
        queue.push(record_due_in(5_000));
        tokio::time::sleep(Duration::from_millis(30)).await;
        let soon = record_due_in(100);
        queue.push(soon.clone());

        let released = tokio::time::timeout(Duration::from_millis(1500), rx.recv())
            .await
            .expect("the earlier record should fire first")
            .expect("channel open");
        assert_eq!(released.id, soon.id);

        token.cancel();
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let queue = Arc::new(DispatchQueue::new());
        let (tx, mut rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let _loop = tokio::spawn(run_release_loop(queue.clone(), tx, token.clone()));

        queue.push(record_due_in(-100));
        queue.push(record_due_in(-100));
        queue.push(record_due_in(-100));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // exactly one made it; the rest were dropped, not queued
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert!(queue.is_empty());

        token.cancel();
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let queue = Arc::new(DispatchQueue::new());
        let (tx, _rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_release_loop(queue, tx, token.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop")
            .expect("loop should not panic");
    }
}
