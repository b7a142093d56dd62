//! PostgreSQL implementations of the store traits.

use crate::error::StoreError;
use crate::schedule_store::ScheduleStore;
use crate::webhooks::VerifiedWebhookStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use punctual_core::{HttpMethod, ScheduleId};
use punctual_schedule::{ScheduleRecord, ScheduleStatus};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// Idempotent schema for the live, archive, and verification tables.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schedulers (
    id TEXT PRIMARY KEY,
    webhook_url TEXT NOT NULL,
    method_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    schedule_time TIMESTAMPTZ,
    cron_expression TEXT,
    next_run_time TIMESTAMPTZ NOT NULL,
    status TEXT NOT NULL,
    retries INTEGER NOT NULL DEFAULT 0,
    retry_limit INTEGER NOT NULL DEFAULT 3,
    retry_after_seconds INTEGER NOT NULL DEFAULT 30,
    webhook_retry_count INTEGER NOT NULL DEFAULT 0,
    webhook_retry_limit INTEGER NOT NULL DEFAULT 3,
    webhook_retry_after_seconds INTEGER NOT NULL DEFAULT 30,
    run_count INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_schedulers_next_run_time
    ON schedulers (next_run_time ASC);

CREATE TABLE IF NOT EXISTS archives (
    id TEXT PRIMARY KEY,
    webhook_url TEXT NOT NULL,
    method_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    schedule_time TIMESTAMPTZ,
    cron_expression TEXT,
    next_run_time TIMESTAMPTZ NOT NULL,
    status TEXT NOT NULL,
    retries INTEGER NOT NULL DEFAULT 0,
    retry_limit INTEGER NOT NULL DEFAULT 3,
    retry_after_seconds INTEGER NOT NULL DEFAULT 30,
    webhook_retry_count INTEGER NOT NULL DEFAULT 0,
    webhook_retry_limit INTEGER NOT NULL DEFAULT 3,
    webhook_retry_after_seconds INTEGER NOT NULL DEFAULT 30,
    run_count INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS verified_webhooks (
    webhook_url TEXT NOT NULL,
    method_type TEXT NOT NULL,
    verified BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (webhook_url, method_type)
);
"#;

/// Column list shared by every schedule query.
const COLUMNS: &str = "id, webhook_url, method_type, payload, schedule_time, cron_expression, \
     next_run_time, status, retries, retry_limit, retry_after_seconds, webhook_retry_count, \
     webhook_retry_limit, webhook_retry_after_seconds, run_count, created_at, updated_at";

/// Row type for schedule queries.
#[derive(FromRow)]
struct ScheduleRow {
    id: String,
    webhook_url: String,
    method_type: String,
    payload: String,
    schedule_time: Option<DateTime<Utc>>,
    cron_expression: Option<String>,
    next_run_time: DateTime<Utc>,
    status: String,
    retries: i32,
    retry_limit: i32,
    retry_after_seconds: i32,
    webhook_retry_count: i32,
    webhook_retry_limit: i32,
    webhook_retry_after_seconds: i32,
    run_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn counter(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

impl ScheduleRow {
    fn try_into_record(self) -> Result<ScheduleRecord, StoreError> {
        let id = ScheduleId::from_str(&self.id).map_err(|e| StoreError::Decode {
            reason: format!("invalid schedule id '{}': {}", self.id, e),
        })?;
        let method = HttpMethod::from_str(&self.method_type).map_err(|e| StoreError::Decode {
            reason: format!("invalid method '{}': {}", self.method_type, e),
        })?;

        Ok(ScheduleRecord {
            id,
            webhook_url: self.webhook_url,
            method,
            payload: self.payload,
            schedule_time: self.schedule_time,
            cron_expression: self.cron_expression,
            next_run_time: self.next_run_time,
            status: ScheduleStatus::from_str_value(&self.status),
            retries: counter(self.retries),
            retry_limit: counter(self.retry_limit),
            retry_after_seconds: counter(self.retry_after_seconds),
            webhook_retry_count: counter(self.webhook_retry_count),
            webhook_retry_limit: counter(self.webhook_retry_limit),
            webhook_retry_after_seconds: counter(self.webhook_retry_after_seconds),
            run_count: counter(self.run_count),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// PostgreSQL-backed schedule store.
#[derive(Clone)]
pub struct PostgresScheduleStore {
    pool: PgPool,
}

impl PostgresScheduleStore {
    /// Creates a store from an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the tables and indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns a store error when schema creation fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn select(filter: &str) -> String {
        format!("SELECT {COLUMNS} FROM schedulers WHERE {filter}")
    }
}

#[async_trait]
impl ScheduleStore for PostgresScheduleStore {
    async fn insert(&self, record: &ScheduleRecord) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO schedulers ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        );
        sqlx::query(&sql)
            .bind(record.id.to_string())
            .bind(&record.webhook_url)
            .bind(record.method.as_str())
            .bind(&record.payload)
            .bind(record.schedule_time)
            .bind(&record.cron_expression)
            .bind(record.next_run_time)
            .bind(record.status.as_str())
            .bind(record.retries as i32)
            .bind(record.retry_limit as i32)
            .bind(record.retry_after_seconds as i32)
            .bind(record.webhook_retry_count as i32)
            .bind(record.webhook_retry_limit as i32)
            .bind(record.webhook_retry_after_seconds as i32)
            .bind(record.run_count as i32)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn find(&self, id: ScheduleId) -> Result<Option<ScheduleRecord>, StoreError> {
        let row: Option<ScheduleRow> = sqlx::query_as(&Self::select("id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ScheduleRow::try_into_record).transpose()
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        horizon: Duration,
        backward: Duration,
        limit: i64,
    ) -> Result<Vec<ScheduleRecord>, StoreError> {
        let sql = format!(
            "UPDATE schedulers SET status = 'processing', updated_at = $1 \
             WHERE id IN ( \
                 SELECT id FROM schedulers \
                 WHERE (status = 'pending' AND next_run_time <= $2) \
                    OR (status = 'processing' AND next_run_time >= $3) \
                 ORDER BY next_run_time ASC \
                 LIMIT $4 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );

        let rows: Vec<ScheduleRow> = sqlx::query_as(&sql)
            .bind(now)
            .bind(now + horizon)
            .bind(now - backward)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut records: Vec<ScheduleRecord> = rows
            .into_iter()
            .map(ScheduleRow::try_into_record)
            .collect::<Result<_, _>>()?;
        // RETURNING does not preserve the subquery order
        records.sort_by_key(|r| r.next_run_time);
        Ok(records)
    }

    async fn begin_attempt(
        &self,
        id: ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleRecord>, StoreError> {
        let sql = format!(
            "UPDATE schedulers \
             SET status = 'in-progress', run_count = run_count + 1, \
                 webhook_retry_count = 0, updated_at = $2 \
             WHERE id = $1 AND status = 'processing' \
             RETURNING {COLUMNS}"
        );

        let row: Option<ScheduleRow> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ScheduleRow::try_into_record).transpose()
    }

    async fn record_retry(
        &self,
        id: ScheduleId,
        next_run_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE schedulers \
             SET status = 'pending', retries = retries + 1, next_run_time = $2, updated_at = $3 \
             WHERE id = $1",
        )
        .bind(id.to_string())
        .bind(next_run_time)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn bump_webhook_retry(
        &self,
        id: ScheduleId,
    ) -> Result<Option<ScheduleRecord>, StoreError> {
        let sql = format!(
            "UPDATE schedulers \
             SET webhook_retry_count = webhook_retry_count + 1, updated_at = $2 \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );

        let row: Option<ScheduleRow> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ScheduleRow::try_into_record).transpose()
    }

    async fn archive(
        &self,
        id: ScheduleId,
        final_status: ScheduleStatus,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let insert = format!(
            "INSERT INTO archives ({COLUMNS}) \
             SELECT id, webhook_url, method_type, payload, schedule_time, cron_expression, \
                    next_run_time, $2, retries, retry_limit, retry_after_seconds, \
                    webhook_retry_count, webhook_retry_limit, webhook_retry_after_seconds, \
                    run_count, created_at, $3 \
             FROM schedulers WHERE id = $1 \
             ON CONFLICT (id) DO NOTHING"
        );
        sqlx::query(&insert)
            .bind(id.to_string())
            .bind(final_status.as_str())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM schedulers WHERE id = $1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_archived(&self, id: ScheduleId) -> Result<Option<ScheduleRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM archives WHERE id = $1");
        let row: Option<ScheduleRow> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ScheduleRow::try_into_record).transpose()
    }

    async fn find_stuck(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
        stale: Duration,
    ) -> Result<Vec<ScheduleRecord>, StoreError> {
        let sql = Self::select(
            "status NOT IN ('completed', 'failed') \
             AND next_run_time >= $1 AND next_run_time < $2 \
             ORDER BY next_run_time ASC",
        );

        let rows: Vec<ScheduleRow> = sqlx::query_as(&sql)
            .bind(now - stale)
            .bind(now - grace)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ScheduleRow::try_into_record).collect()
    }
}

/// PostgreSQL-backed verified webhook store.
#[derive(Clone)]
pub struct PostgresVerifiedWebhookStore {
    pool: PgPool,
}

impl PostgresVerifiedWebhookStore {
    /// Creates a store from an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerifiedWebhookStore for PostgresVerifiedWebhookStore {
    async fn is_verified(&self, url: &str, method: HttpMethod) -> Result<bool, StoreError> {
        let row: Option<(bool,)> = sqlx::query_as(
            "SELECT verified FROM verified_webhooks WHERE webhook_url = $1 AND method_type = $2",
        )
        .bind(url)
        .bind(method.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(verified,)| verified).unwrap_or(false))
    }

    async fn add(&self, url: &str, method: HttpMethod) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO verified_webhooks (webhook_url, method_type, verified, created_at) \
             VALUES ($1, $2, TRUE, $3) \
             ON CONFLICT (webhook_url, method_type) DO UPDATE SET verified = TRUE",
        )
        .bind(url)
        .bind(method.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
