//! Repository for the append-only delivery log.
//!
//! One row per attempted delivery, success or failure. Rows are never
//! updated; cancelled queue items produce no log entry because no attempt
//! was made.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{DeliveryLogEntry, SubscriptionId},
};

const LOG_COLUMNS: &str = "id, subscription_id, event, url, payload, status_code, succeeded, \
                           error, duration_ms, attempted_at";

/// Fields recorded for one delivery attempt.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    /// Subscription the attempt was made for.
    pub subscription_id: SubscriptionId,
    /// Domain event name.
    pub event: String,
    /// Target URL at the time of the attempt.
    pub url: String,
    /// Payload that was delivered.
    pub payload: serde_json::Value,
    /// HTTP status code; 0 for connection-level failures.
    pub status_code: i32,
    /// Whether a 2xx response was received.
    pub succeeded: bool,
    /// Error description for failed attempts.
    pub error: Option<String>,
    /// Wall-clock duration of the attempt in milliseconds.
    pub duration_ms: i64,
}

/// Repository for delivery log database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Appends one delivery attempt record.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create(&self, entry: &NewLogEntry, now: DateTime<Utc>) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO webhook_delivery_logs (
                id, subscription_id, event, url, payload, status_code,
                succeeded, error, duration_ms, attempted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.subscription_id.0)
        .bind(&entry.event)
        .bind(&entry.url)
        .bind(sqlx::types::Json(&entry.payload))
        .bind(entry.status_code)
        .bind(entry.succeeded)
        .bind(&entry.error)
        .bind(entry.duration_ms)
        .bind(now)
        .fetch_one(&*self.pool)
        .await?;

        Ok(id)
    }

    /// Returns a page of a subscription's delivery history, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_subscription(
        &self,
        subscription_id: SubscriptionId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DeliveryLogEntry>> {
        let entries = sqlx::query_as::<_, DeliveryLogEntry>(&format!(
            r#"
            SELECT {LOG_COLUMNS}
            FROM webhook_delivery_logs
            WHERE subscription_id = $1
            ORDER BY attempted_at DESC
            LIMIT $2 OFFSET $3
            "#,
        ))
        .bind(subscription_id.0)
        .bind(limit)
        .bind(offset)
        .fetch_all(&*self.pool)
        .await?;

        Ok(entries)
    }

    /// Counts all delivery attempts recorded for a subscription.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_subscription(&self, subscription_id: SubscriptionId) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM webhook_delivery_logs
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id.0)
        .fetch_one(&*self.pool)
        .await?;

        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repository_can_be_created() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://test").unwrap();
        let _repo = Repository::new(Arc::new(pool));
    }
}
