//! Redis implementation of the dispatch cache.

use crate::error::CacheError;
use crate::traits::DispatchCache;
use async_trait::async_trait;
use punctual_core::ScheduleId;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Key of the processed-ids set.
const PROCESSED_KEY: &str = "processed_schedules";

/// Key of the promoted-ids set.
const IN_QUEUE_KEY: &str = "in_queue";

/// Redis-backed dispatch cache.
#[derive(Clone)]
pub struct RedisDispatchCache {
    conn: ConnectionManager,
}

impl RedisDispatchCache {
    /// Connects to Redis and pings it once.
    ///
    /// # Errors
    ///
    /// Returns a cache error when the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(CacheError::from)?;
        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(CacheError::from)?;

        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(CacheError::from)?;

        Ok(Self { conn })
    }

    async fn add_with_expiry(
        &self,
        key: &str,
        members: Vec<String>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if members.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        redis::pipe()
            .sadd(key, members)
            .expire(key, ttl.as_secs() as i64)
            .query_async::<()>(&mut conn)
            .await
            .map_err(CacheError::from)
    }

    async fn contains(&self, key: &str, member: String) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        conn.sismember(key, member).await.map_err(CacheError::from)
    }
}

#[async_trait]
impl DispatchCache for RedisDispatchCache {
    async fn mark_processed(&self, id: ScheduleId, ttl: Duration) -> Result<(), CacheError> {
        self.add_with_expiry(PROCESSED_KEY, vec![id.to_string()], ttl)
            .await
    }

    async fn is_processed(&self, id: ScheduleId) -> Result<bool, CacheError> {
        self.contains(PROCESSED_KEY, id.to_string()).await
    }

    async fn mark_in_queue(&self, ids: &[ScheduleId], ttl: Duration) -> Result<(), CacheError> {
        let members = ids.iter().map(ToString::to_string).collect();
        self.add_with_expiry(IN_QUEUE_KEY, members, ttl).await
    }

    async fn is_in_queue(&self, id: ScheduleId) -> Result<bool, CacheError> {
        self.contains(IN_QUEUE_KEY, id.to_string()).await
    }
}
