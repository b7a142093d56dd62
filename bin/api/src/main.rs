//! Ingestion API process.

use punctual_api::{ApiContext, LlmTimeParser, TimeParser};
use punctual_codec::PayloadCipher;
use punctual_store::{PostgresScheduleStore, PostgresVerifiedWebhookStore};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Process configuration, loaded from the environment.
#[derive(Debug, Deserialize)]
struct Config {
    /// PostgreSQL connection URL.
    database_url: String,

    /// AES key for payload encryption (16, 24, or 32 bytes).
    payload_encryption_key: String,

    /// Secret for the webhook verification handshake.
    #[serde(default)]
    webhook_secret_key: String,

    /// Listen address.
    #[serde(default = "default_listen_addr")]
    listen_addr: String,

    /// Deployment environment; "development" skips webhook verification.
    #[serde(default = "default_environment")]
    environment: String,

    /// Natural-language time parsing backend.
    #[serde(default)]
    llm: LlmConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LlmConfig {
    /// Chat-completions endpoint URL.
    #[serde(default)]
    api_url: Option<String>,

    /// API key for the endpoint.
    #[serde(default)]
    api_key: Option<String>,

    /// Model override.
    #[serde(default)]
    model: Option<String>,
}

impl LlmConfig {
    fn is_configured(&self) -> bool {
        self.api_url.is_some() && self.api_key.is_some()
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_environment() -> String {
    "production".to_string()
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

    fn is_development(&self) -> bool {
        self.environment == "development"
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

    let store = PostgresScheduleStore::new(db_pool.clone());
    store
        .ensure_schema()
        .await
        .expect("failed to ensure database schema");

    let time_parser: Option<Arc<dyn TimeParser>> = if config.llm.is_configured() {
        tracing::info!("Natural-language time parsing is configured");
        Some(Arc::new(LlmTimeParser::new(
            config.llm.api_url.clone().expect("checked above"),
            config.llm.api_key.clone().expect("checked above"),
            config.llm.model.clone(),
        )))
    } else {
        tracing::info!(
            "Natural-language time parsing not configured (set LLM__API_URL, LLM__API_KEY)"
        );
        None
    };

    if config.is_development() {
        tracing::warn!("Development mode: webhook verification is skipped");
    } else if config.webhook_secret_key.is_empty() {
        tracing::warn!("WEBHOOK_SECRET_KEY is empty; verification handshakes will fail");
    }

    let context = Arc::new(ApiContext {
        schedules: Arc::new(store),
        webhooks: Arc::new(PostgresVerifiedWebhookStore::new(db_pool)),
        cipher: Arc::new(cipher),
        time_parser,
        webhook_secret: config.webhook_secret_key.clone(),
        skip_verification: config.is_development(),
        http: reqwest::Client::new(),
    });

    let app = punctual_api::router(context);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app.into_make_service())
        .await
        .expect("server error");
}
