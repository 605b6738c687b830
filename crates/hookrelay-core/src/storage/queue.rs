//! Repository for delivery queue database operations.
//!
//! Handles enqueuing, atomic claiming for concurrent delivery, terminal
//! state transitions, and the retention operations used by the sweeper.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{NewQueueItem, QueueItem, QueueItemId, QueueStatus},
};

const QUEUE_COLUMNS: &str = "id, subscription_id, event, payload, status, scheduled_for, \
                             created_at, started_at, completed_at, status_code, error";

/// Repository for delivery queue database operations.
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

    /// Enqueues a new notification in pending status.
    ///
    /// `scheduled_for` defaults to `now` when the request omits it, making
    /// the item eligible for the next poll cycle.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` if the subscription does not exist.
    pub async fn enqueue(&self, item: &NewQueueItem, now: DateTime<Utc>) -> Result<QueueItemId> {
        let id = QueueItemId::new();
        let scheduled_for = item.scheduled_for.unwrap_or(now);

        sqlx::query(
            r#"
            INSERT INTO webhook_queue (
                id, subscription_id, event, payload, status, scheduled_for, created_at
            ) VALUES ($1, $2, $3, $4, 'pending', $5, $6)
            "#,
        )
        .bind(id.0)
        .bind(item.subscription_id.0)
        .bind(&item.event)
        .bind(sqlx::types::Json(&item.payload))
        .bind(scheduled_for)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(id)
    }

    /// Claims due pending items for delivery.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so concurrent pollers claim disjoint
    /// batches without blocking each other. Claimed items move to
    /// `processing` with `started_at` recorded before the transaction
    /// commits, so no item can be claimed twice.
    ///
    /// Items are claimed oldest-first by `created_at`.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails.
    pub async fn claim_due(&self, batch_size: usize, now: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        let mut tx = self.pool.begin().await?;

        let item_ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM webhook_queue
            WHERE status = 'pending'
              AND scheduled_for <= $1
            ORDER BY created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await?;

        if item_ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let items = sqlx::query_as::<_, QueueItem>(&format!(
            r#"
            UPDATE webhook_queue
            SET status = 'processing', started_at = $2
            WHERE id = ANY($1)
            RETURNING {QUEUE_COLUMNS}
            "#,
        ))
        .bind(&item_ids)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        // RETURNING does not preserve claim order.
        let mut items = items;
        items.sort_by_key(|item| item.created_at);

        Ok(items)
    }

    /// Marks an item as successfully delivered. Terminal.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_completed(
        &self,
        item_id: QueueItemId,
        status_code: i32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_queue
            SET status = 'completed', status_code = $2, completed_at = $3, error = NULL
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(item_id.0)
        .bind(status_code)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Marks an item as failed. Terminal; failed items are never retried.
    ///
    /// `status_code` is 0 when no HTTP response was obtained.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed(
        &self,
        item_id: QueueItemId,
        status_code: i32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_queue
            SET status = 'failed', status_code = $2, error = $3, completed_at = $4
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(item_id.0)
        .bind(status_code)
        .bind(error)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Marks an item as cancelled without a delivery attempt. Terminal.
    ///
    /// Used when the target subscription is missing or inactive at claim
    /// time.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_cancelled(
        &self,
        item_id: QueueItemId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_queue
            SET status = 'cancelled', error = $2, completed_at = $3
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(item_id.0)
        .bind(error)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Finds a queue item by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, item_id: QueueItemId) -> Result<Option<QueueItem>> {
        let item = sqlx::query_as::<_, QueueItem>(&format!(
            r#"
            SELECT {QUEUE_COLUMNS}
            FROM webhook_queue
            WHERE id = $1
            "#,
        ))
        .bind(item_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(item)
    }

    /// Counts queue items in the given status.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_status(&self, status: QueueStatus) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM webhook_queue
            WHERE status = $1
            "#,
        )
        .bind(status.to_string())
        .fetch_one(&*self.pool)
        .await?;

        Ok(count.0)
    }

    /// Deletes terminal items enqueued before the cutoff.
    ///
    /// Filters on status, so pending and processing items are never touched
    /// regardless of age. Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM webhook_queue
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND created_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Resets processing items whose claim is older than the cutoff back to
    /// pending.
    ///
    /// An item stuck in processing past the delivery timeout means the
    /// claiming task died before recording an outcome. Returning it to
    /// pending lets a later cycle claim it again.
    ///
    /// Returns the IDs of the reclaimed items.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn reclaim_stuck(&self, cutoff: DateTime<Utc>) -> Result<Vec<QueueItemId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE webhook_queue
            SET status = 'pending', started_at = NULL
            WHERE status = 'processing'
              AND started_at < $1
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&*self.pool)
        .await?;

        Ok(ids.into_iter().map(QueueItemId).collect())
    }
}
