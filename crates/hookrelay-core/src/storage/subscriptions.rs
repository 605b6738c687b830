//! Repository for webhook subscription database operations.
//!
//! Covers subscription registration and configuration, the per-subscriber
//! delivery counters maintained by the delivery engine, and the fan-out
//! lookup used when a domain event is published.

use std::collections::HashMap;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::{CoreError, Result},
    models::{Subscription, SubscriptionId, SubscriptionSummary},
};

const SUBSCRIPTION_COLUMNS: &str = "id, url, secret, headers, events, is_active, total_calls, \
                                    successful_calls, failed_calls, last_called_at, created_at, \
                                    updated_at";

/// Fields accepted when registering or reconfiguring a subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Target URL for deliveries. Unique across subscriptions.
    pub url: String,
    /// HMAC signing secret; deliveries are unsigned when absent.
    pub secret: Option<String>,
    /// Custom headers applied after the protocol headers.
    pub headers: HashMap<String, String>,
    /// Event names the subscriber wants to receive.
    pub events: Vec<String>,
    /// Whether the subscription receives deliveries.
    pub is_active: bool,
}

/// Repository for subscription database operations.
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

    /// Registers a new subscription with zeroed counters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the URL is empty, `ConstraintViolation` if
    /// the URL is already registered.
    pub async fn create(
        &self,
        config: &SubscriptionConfig,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        if config.url.trim().is_empty() {
            return Err(CoreError::InvalidInput("subscription url must not be empty".to_string()));
        }

        let sub = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO webhook_subscriptions (
                id, url, secret, headers, events, is_active, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(SubscriptionId::new().0)
        .bind(&config.url)
        .bind(&config.secret)
        .bind(sqlx::types::Json(&config.headers))
        .bind(sqlx::types::Json(&config.events))
        .bind(config.is_active)
        .bind(now)
        .fetch_one(&*self.pool)
        .await?;

        Ok(sub)
    }

    /// Finds a subscription by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let sub = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM webhook_subscriptions
            WHERE id = $1
            "#,
        ))
        .bind(id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(sub)
    }

    /// Finds all active subscriptions subscribed to the given event name.
    ///
    /// Fan-out lookup used when a domain event is published; each match gets
    /// its own queue item.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_active_by_event(&self, event: &str) -> Result<Vec<Subscription>> {
        let subs = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM webhook_subscriptions
            WHERE is_active = TRUE
              AND events @> jsonb_build_array($1::text)
            ORDER BY created_at ASC
            "#,
        ))
        .bind(event)
        .fetch_all(&*self.pool)
        .await?;

        Ok(subs)
    }

    /// Replaces a subscription's configuration.
    ///
    /// Counters and timestamps other than `updated_at` are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no subscription has this ID.
    pub async fn update(
        &self,
        id: SubscriptionId,
        config: &SubscriptionConfig,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        if config.url.trim().is_empty() {
            return Err(CoreError::InvalidInput("subscription url must not be empty".to_string()));
        }

        let sub = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE webhook_subscriptions
            SET url = $2, secret = $3, headers = $4, events = $5, is_active = $6, updated_at = $7
            WHERE id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(id.0)
        .bind(&config.url)
        .bind(&config.secret)
        .bind(sqlx::types::Json(&config.headers))
        .bind(sqlx::types::Json(&config.events))
        .bind(config.is_active)
        .bind(now)
        .fetch_one(&*self.pool)
        .await?;

        Ok(sub)
    }

    /// Activates or deactivates a subscription.
    ///
    /// Queued items for a deactivated subscription are cancelled at claim
    /// time rather than delivered.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn set_active(
        &self,
        id: SubscriptionId,
        is_active: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_subscriptions
            SET is_active = $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(is_active)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Deletes a subscription.
    ///
    /// Fails while undelivered queue items still reference it; delivery
    /// logs are removed with it.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` if queue items still reference the
    /// subscription.
    pub async fn delete(&self, id: SubscriptionId) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM webhook_subscriptions
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Records the outcome of one delivery attempt on the counters.
    ///
    /// Increments `total_calls` and exactly one of `successful_calls` or
    /// `failed_calls`, and stamps `last_called_at`. Cancelled items never
    /// reach this method, so the invariant `total = successful + failed`
    /// holds.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn record_attempt(
        &self,
        id: SubscriptionId,
        succeeded: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_subscriptions
            SET total_calls = total_calls + 1,
                successful_calls = successful_calls + CASE WHEN $2 THEN 1 ELSE 0 END,
                failed_calls = failed_calls + CASE WHEN $2 THEN 0 ELSE 1 END,
                last_called_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(succeeded)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Lists all subscriptions as reporting summaries, newest first.
    ///
    /// The signing secret never appears in summaries.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list_summaries(&self) -> Result<Vec<SubscriptionSummary>> {
        let subs = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM webhook_subscriptions
            ORDER BY created_at DESC
            "#,
        ))
        .fetch_all(&*self.pool)
        .await?;

        Ok(subs.iter().map(Subscription::summary).collect())
    }
}
