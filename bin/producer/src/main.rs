//! Producer process: promotes due schedules onto the bus and reaps stuck
//! work.

use punctual_bus::{NatsBusConfig, NatsSchedulePublisher};
use punctual_cache::RedisDispatchCache;
use punctual_engine::{Producer, ProducerConfig};
use punctual_store::PostgresScheduleStore;
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Process configuration, loaded from the environment.
#[derive(Debug, Deserialize)]
struct Config {
    /// PostgreSQL connection URL.
    database_url: String,

    /// NATS server URL.
    #[serde(default = "default_nats_url")]
    nats_url: String,

    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    redis_url: String,

    /// Producer tuning.
    #[serde(default)]
    producer: Tuning,
}

#[derive(Debug, Clone, Deserialize)]
struct Tuning {
    /// Seconds between publish ticks.
    #[serde(default = "default_fetch_window_seconds")]
    fetch_window_seconds: u64,

    /// Maximum records claimed per tick.
    #[serde(default = "default_max_fetch_per_window")]
    max_fetch_per_window: i64,

    /// Seconds between reap ticks.
    #[serde(default = "default_reap_interval_seconds")]
    reap_interval_seconds: u64,

    /// Seconds allowed for graceful shutdown.
    #[serde(default = "default_shutdown_timeout_seconds")]
    shutdown_timeout_seconds: u64,
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_fetch_window_seconds() -> u64 {
    5
}

fn default_max_fetch_per_window() -> i64 {
    1000
}

fn default_reap_interval_seconds() -> u64 {
    600
}

fn default_shutdown_timeout_seconds() -> u64 {
    30
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            fetch_window_seconds: default_fetch_window_seconds(),
            max_fetch_per_window: default_max_fetch_per_window(),
            reap_interval_seconds: default_reap_interval_seconds(),
            shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
        }
    }
}

impl Config {
    fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    fn producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            fetch_window: Duration::from_secs(self.producer.fetch_window_seconds),
            max_fetch_per_window: self.producer.max_fetch_per_window,
            reap_interval: Duration::from_secs(self.producer.reap_interval_seconds),
            ..ProducerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let store = PostgresScheduleStore::new(db_pool);
    store
        .ensure_schema()
        .await
        .expect("failed to ensure database schema");

    tracing::info!("Connecting to NATS...");
    let publisher = NatsSchedulePublisher::connect(&NatsBusConfig::new(&config.nats_url))
        .await
        .expect("failed to connect to message bus");

    tracing::info!("Connecting to Redis...");
    let cache = RedisDispatchCache::connect(&config.redis_url)
        .await
        .expect("failed to connect to cache");

    let shutdown_timeout = Duration::from_secs(config.producer.shutdown_timeout_seconds);
    let producer = Producer::new(
        Arc::new(store),
        Arc::new(publisher),
        Arc::new(cache),
        config.producer_config(),
    );

    let token = CancellationToken::new();
    let run = {
        let token = token.clone();
        tokio::spawn(async move { producer.run(token).await })
    };

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    tracing::info!("Shutdown signal received");
    token.cancel();

    match tokio::time::timeout(shutdown_timeout, run).await {
        Ok(_) => tracing::info!("Producer stopped gracefully"),
        Err(_) => tracing::warn!("Shutdown timed out, forcing exit"),
    }
}
