//! Verified webhook storage.
//!
//! The ingestion API only schedules against `(url, method)` pairs that have
//! passed one-time ownership verification; the engine never mutates this
//! collection.

use crate::error::StoreError;
use async_trait::async_trait;
use punctual_core::HttpMethod;

/// Storage for verified webhook targets.
#[async_trait]
pub trait VerifiedWebhookStore: Send + Sync {
    /// Returns true when the pair has been verified.
    async fn is_verified(&self, url: &str, method: HttpMethod) -> Result<bool, StoreError>;

    /// Records a verified pair. Idempotent.
    async fn add(&self, url: &str, method: HttpMethod) -> Result<(), StoreError>;
}

/// In-memory verified webhook store for tests.
#[derive(Default)]
pub struct InMemoryVerifiedWebhookStore {
    verified: std::sync::Mutex<std::collections::HashSet<(String, HttpMethod)>>,
}

impl InMemoryVerifiedWebhookStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VerifiedWebhookStore for InMemoryVerifiedWebhookStore {
    async fn is_verified(&self, url: &str, method: HttpMethod) -> Result<bool, StoreError> {
        Ok(self
            .verified
            .lock()
            .expect("webhook store lock poisoned")
            .contains(&(url.to_string(), method)))
    }

    async fn add(&self, url: &str, method: HttpMethod) -> Result<(), StoreError> {
        self.verified
            .lock()
            .expect("webhook store lock poisoned")
            .insert((url.to_string(), method));
        Ok(())
    }
}
