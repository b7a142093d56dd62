//! Consumer process: drains the bus into the dispatch queue and executes
//! due webhooks.

use punctual_bus::{NatsBusConfig, NatsScheduleSource};
use punctual_cache::RedisDispatchCache;
use punctual_codec::PayloadCipher;
use punctual_engine::{run_consumer, ConsumerConfig, Dispatcher, DispatcherConfig};
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

    /// AES key for payload decryption (16, 24, or 32 bytes).
    payload_encryption_key: String,

    /// Consumer tuning.
    #[serde(default)]
    consumer: Tuning,
}

#[derive(Debug, Clone, Deserialize)]
struct Tuning {
    /// Number of dispatcher workers.
    #[serde(default = "default_worker_count")]
    worker_count: usize,

    /// Capacity of the dispatch channel.
    #[serde(default = "default_channel_capacity")]
    channel_capacity: usize,

    /// Total webhook timeout in seconds.
    #[serde(default = "default_http_timeout_seconds")]
    http_timeout_seconds: u64,

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

fn default_worker_count() -> usize {
    4
}

fn default_channel_capacity() -> usize {
    100_000
}

fn default_http_timeout_seconds() -> u64 {
    10
}

fn default_shutdown_timeout_seconds() -> u64 {
    30
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            channel_capacity: default_channel_capacity(),
            http_timeout_seconds: default_http_timeout_seconds(),
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

    let cipher = PayloadCipher::new(config.payload_encryption_key.as_bytes())
        .expect("invalid payload encryption key");

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

    tracing::info!("Joining consumer group...");
    let source = NatsScheduleSource::connect(&NatsBusConfig::new(&config.nats_url))
        .await
        .expect("failed to join the consumer group");

    tracing::info!("Connecting to Redis...");
    let cache = RedisDispatchCache::connect(&config.redis_url)
        .await
        .expect("failed to connect to cache");

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(store),
        Arc::new(cache),
        Arc::new(cipher),
        reqwest::Client::new(),
        DispatcherConfig {
            http_timeout: Duration::from_secs(config.consumer.http_timeout_seconds),
            ..DispatcherConfig::default()
        },
    ));

    let consumer_config = ConsumerConfig {
        channel_capacity: config.consumer.channel_capacity,
        worker_count: config.consumer.worker_count,
    };
    let shutdown_timeout = Duration::from_secs(config.consumer.shutdown_timeout_seconds);

    let token = CancellationToken::new();
    let run = tokio::spawn(run_consumer(
        source,
        dispatcher,
        consumer_config,
        token.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    tracing::info!("Shutdown signal received");
    token.cancel();

    match tokio::time::timeout(shutdown_timeout, run).await {
        Ok(_) => tracing::info!("Consumer stopped gracefully"),
        Err(_) => tracing::warn!("Shutdown timed out, forcing exit"),
    }
}
