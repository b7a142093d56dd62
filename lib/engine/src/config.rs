//! Engine tuning knobs with production defaults.

use chrono::Duration as ChronoDuration;
use std::time::Duration;

/// Producer tuning.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Interval between publish ticks.
    pub fetch_window: Duration,
    /// Maximum records claimed per publish tick.
    pub max_fetch_per_window: i64,
    /// How far into the future pending records are promoted.
    pub promote_horizon: ChronoDuration,
    /// How far back `processing` records stay eligible for republish.
    pub backward_window: ChronoDuration,
    /// Interval between reap ticks.
    pub reap_interval: Duration,
    /// Lower bound of the reap window (younger records may be in flight).
    pub reap_grace: ChronoDuration,
    /// Upper bound of the reap window.
    pub reap_stale: ChronoDuration,
    /// TTL of the in-queue hint set.
    pub in_queue_ttl: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            fetch_window: Duration::from_secs(5),
            max_fetch_per_window: 1000,
            promote_horizon: ChronoDuration::minutes(1),
            backward_window: ChronoDuration::minutes(5),
            reap_interval: Duration::from_secs(600),
            reap_grace: ChronoDuration::minutes(5),
            reap_stale: ChronoDuration::minutes(10),
            in_queue_ttl: Duration::from_secs(120),
        }
    }
}

/// Consumer tuning.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Capacity of the bounded dispatch channel.
    pub channel_capacity: usize,
    /// Number of dispatcher workers.
    pub worker_count: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 100_000,
            worker_count: 4,
        }
    }
}

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Total timeout for a webhook invocation.
    pub http_timeout: Duration,
    /// TTL of the processed-ids set.
    pub processed_ttl: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(10),
            processed_ttl: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_defaults_match_the_windows() {
        let config = ProducerConfig::default();
        assert_eq!(config.fetch_window, Duration::from_secs(5));
        assert_eq!(config.max_fetch_per_window, 1000);
        assert_eq!(config.promote_horizon, ChronoDuration::minutes(1));
        assert_eq!(config.backward_window, ChronoDuration::minutes(5));
        assert_eq!(config.reap_grace, ChronoDuration::minutes(5));
        assert_eq!(config.reap_stale, ChronoDuration::minutes(10));
    }

    #[test]
    fn consumer_defaults() {
        let config = ConsumerConfig::default();
        assert_eq!(config.channel_capacity, 100_000);
        assert!(config.worker_count >= 1);
    }

    #[test]
    fn dispatcher_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.processed_ttl, Duration::from_secs(300));
    }
}
