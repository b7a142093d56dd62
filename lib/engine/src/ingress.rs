//! Ingress: bus to dispatch queue.
//!
//! Pulls deliveries from the consumer group, pushes each record onto the
//! heap, and only then acknowledges (the offset commit). Poison messages
//! are acknowledged and dropped so they cannot wedge the partition.

use crate::queue::DispatchQueue;
use punctual_bus::ScheduleSource;
use punctual_schedule::ScheduleRecord;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay before retrying a failed bus fetch.
const FETCH_BACKOFF: Duration = Duration::from_secs(1);

/// Runs one ingress pump until the source ends or the token is cancelled.
pub async fn run_ingress<Src>(mut source: Src, queue: Arc<DispatchQueue>, token: CancellationToken)
where
    Src: ScheduleSource,
{
    loop {
        let next = tokio::select! {
            () = token.cancelled() => {
                info!("ingress stopping");
                return;
            }
            next = source.next() => next,
        };

        match next {
            Ok(Some(delivery)) => {
                match serde_json::from_slice::<ScheduleRecord>(&delivery.payload) {
                    Ok(record) => {
                        debug!(
                            schedule_id = %record.id,
                            next_run = %record.next_run_time,
                            "queued schedule"
                        );
                        queue.push(record);
                    }
                    Err(e) => {
                        warn!(key = %delivery.key, error = %e, "dropping poison message");
                    }
                }

                if let Err(e) = delivery.ack().await {
                    warn!(error = %e, "failed to commit bus offset");
                }
            }
            Ok(None) => {
                info!("schedule source ended");
                return;
            }
            Err(e) => {
                warn!(error = %e, "bus fetch failed, backing off");
                tokio::select! {
                    () = token.cancelled() => return,
                    () = tokio::time::sleep(FETCH_BACKOFF) => {}
                }
            }
        }
    }
}
