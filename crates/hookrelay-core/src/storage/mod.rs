//! Database access layer implementing the repository pattern.
//!
//! All queue, subscription, and delivery log persistence goes through these
//! repositories. Direct SQL outside this module is forbidden; the repositories
//! translate between domain models and the database schema so the schema can
//! evolve without touching delivery logic.

use std::sync::Arc;

use sqlx::PgPool;

pub mod delivery_logs;
pub mod queue;
pub mod subscriptions;

use crate::error::Result;

/// Container for all repository instances providing unified database access.
///
/// Entry point for every database operation. Manages a shared connection pool
/// and exposes a repository per table.
#[derive(Clone)]
pub struct Storage {
    /// Repository for the delivery queue.
    pub queue: Arc<queue::Repository>,

    /// Repository for subscription configuration and counters.
    pub subscriptions: Arc<subscriptions::Repository>,

    /// Repository for the append-only delivery log.
    pub delivery_logs: Arc<delivery_logs::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    ///
    /// All repositories share the same pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            queue: Arc::new(queue::Repository::new(pool.clone())),
            subscriptions: Arc::new(subscriptions::Repository::new(pool.clone())),
            delivery_logs: Arc::new(delivery_logs::Repository::new(pool)),
        }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.queue.pool()).await?;

        Ok(())
    }

    /// Fans a domain event out to every active subscription that lists it.
    ///
    /// Inserts one pending queue item per match and returns their IDs. The
    /// caller does not decide routing; the subscribed-event list on each
    /// subscription does.
    ///
    /// # Errors
    ///
    /// Returns error if the subscription lookup or any insert fails.
    pub async fn enqueue_event(
        &self,
        event: &str,
        payload: &serde_json::Value,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<crate::models::QueueItemId>> {
        let targets = self.subscriptions.find_active_by_event(event).await?;

        let mut item_ids = Vec::with_capacity(targets.len());
        for subscription in targets {
            let item = crate::models::NewQueueItem {
                subscription_id: subscription.id,
                event: event.to_string(),
                payload: payload.clone(),
                scheduled_for: None,
            };
            item_ids.push(self.queue.enqueue(&item, now).await?);
        }

        Ok(item_ids)
    }
}
