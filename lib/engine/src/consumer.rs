//! Consumer wiring: ingress, release loop, and dispatcher workers.
//!
//! One process hosts the ingress pump, the single release loop, and
//! `worker_count` dispatcher workers reading from the bounded dispatch
//! channel. On cancellation the ingress and release tasks exit, the channel
//! sender drops (closing the channel after the workers drain it), and each
//! worker finishes its in-flight record before exiting.

use crate::config::ConsumerConfig;
use crate::dispatcher::Dispatcher;
use crate::ingress::run_ingress;
use crate::queue::DispatchQueue;
use crate::release::run_release_loop;
use punctual_bus::ScheduleSource;
use punctual_cache::DispatchCache;
use punctual_schedule::ScheduleRecord;
use punctual_store::ScheduleStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Runs the consumer process until cancellation, returning when every task
/// has finished.
pub async fn run_consumer<Src, S, C>(
    source: Src,
    dispatcher: Arc<Dispatcher<S, C>>,
    config: ConsumerConfig,
    token: CancellationToken,
) where
    Src: ScheduleSource + 'static,
    S: ScheduleStore + 'static,
    C: DispatchCache + 'static,
{
    let queue = Arc::new(DispatchQueue::new());
    let (dispatch_tx, dispatch_rx) = mpsc::channel::<ScheduleRecord>(config.channel_capacity);
    let dispatch_rx = Arc::new(tokio::sync::Mutex::new(dispatch_rx));

    let mut tasks = JoinSet::new();
    tasks.spawn(run_ingress(source, queue.clone(), token.clone()));
    tasks.spawn(run_release_loop(queue, dispatch_tx, token.clone()));

    for worker_id in 0..config.worker_count {
        let dispatch_rx = dispatch_rx.clone();
        let dispatcher = dispatcher.clone();
        tasks.spawn(async move {
            loop {
                // take the lock only to receive, never across a dispatch
                let record = { dispatch_rx.lock().await.recv().await };
                match record {
                    Some(record) => dispatcher.dispatch(record).await,
                    None => {
                        debug!(worker_id, "dispatch channel closed, worker exiting");
                        return;
                    }
                }
            }
        });
    }

    info!(workers = config.worker_count, "consumer started");
    while tasks.join_next().await.is_some() {}
    info!("consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatcherConfig;
    use punctual_bus::in_memory_bus;
    use punctual_cache::InMemoryDispatchCache;
    use punctual_codec::PayloadCipher;
    use punctual_store::InMemoryScheduleStore;
    use std::time::Duration;

    #[tokio::test]
    async fn consumer_shuts_down_on_cancellation() {
        let (_publisher, source) = in_memory_bus(16);
        let store = Arc::new(InMemoryScheduleStore::new());
        let cache = Arc::new(InMemoryDispatchCache::new());
        let cipher =
            Arc::new(PayloadCipher::new(b"0123456789abcdef0123456789abcdef").expect("valid key"));
        let dispatcher = Arc::new(Dispatcher::new(
            store,
            cache,
            cipher,
            reqwest::Client::new(),
            DispatcherConfig::default(),
        ));

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_consumer(
            source,
            dispatcher,
            ConsumerConfig {
                channel_capacity: 16,
                worker_count: 2,
            },
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("consumer should stop promptly")
            .expect("consumer should not panic");
    }
}
