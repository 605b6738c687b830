//! Storage abstraction layer for the delivery engine.
//!
//! Trait-based indirection over queue, subscription, and log persistence so
//! the poller and sweeper can be tested against an in-memory mock instead of
//! a database. Production wires in `hookrelay_core::storage::Storage`.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use hookrelay_core::{
    error::Result,
    models::{QueueItem, QueueItemId, Subscription, SubscriptionId},
    storage::delivery_logs::NewLogEntry,
};

/// Storage operations required by the delivery engine.
///
/// Covers everything the poller and the retention sweeper touch: atomic
/// claiming, terminal transitions, subscription lookup and counters, the
/// delivery log, and retention maintenance.
pub trait DeliveryStorage: Send + Sync + 'static {
    /// Claims due pending items for processing.
    ///
    /// Production uses `FOR UPDATE SKIP LOCKED` so concurrent pollers claim
    /// disjoint batches. Returns up to `batch_size` items oldest-first, all
    /// already moved to processing.
    fn claim_due(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueItem>>> + Send + '_>>;

    /// Looks up the subscription a claimed item targets.
    ///
    /// The result decides whether the item is delivered or cancelled.
    fn find_subscription(
        &self,
        id: SubscriptionId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Subscription>>> + Send + '_>>;

    /// Marks an item as successfully delivered. Terminal.
    fn mark_completed(
        &self,
        item_id: QueueItemId,
        status_code: i32,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Marks an item as failed. Terminal; never retried.
    fn mark_failed(
        &self,
        item_id: QueueItemId,
        status_code: i32,
        error: String,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Marks an item as cancelled without a delivery attempt. Terminal.
    fn mark_cancelled(
        &self,
        item_id: QueueItemId,
        error: String,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Appends one delivery attempt to the audit log.
    fn record_log(
        &self,
        entry: NewLogEntry,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Applies one attempt outcome to the subscription's counters.
    fn record_subscription_attempt(
        &self,
        id: SubscriptionId,
        succeeded: bool,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Deletes terminal items enqueued before the cutoff.
    fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;

    /// Resets processing items claimed before the cutoff back to pending.
    fn reclaim_stuck(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueItemId>>> + Send + '_>>;

    /// Finds a queue item. Used for lifecycle verification.
    fn find_item(
        &self,
        item_id: QueueItemId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<QueueItem>>> + Send + '_>>;
}

/// Production storage implementation using PostgreSQL.
///
/// Thin adapter from the trait to the repository layer.
pub struct PostgresDeliveryStorage {
    storage: Arc<hookrelay_core::storage::Storage>,
}

impl PostgresDeliveryStorage {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(storage: Arc<hookrelay_core::storage::Storage>) -> Self {
        Self { storage }
    }
}

impl DeliveryStorage for PostgresDeliveryStorage {
    fn claim_due(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueItem>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queue.claim_due(batch_size, now).await })
    }

    fn find_subscription(
        &self,
        id: SubscriptionId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Subscription>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.subscriptions.find_by_id(id).await })
    }

    fn mark_completed(
        &self,
        item_id: QueueItemId,
        status_code: i32,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queue.mark_completed(item_id, status_code, now).await })
    }

    fn mark_failed(
        &self,
        item_id: QueueItemId,
        status_code: i32,
        error: String,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(
            async move { storage.queue.mark_failed(item_id, status_code, &error, now).await },
        )
    }

    fn mark_cancelled(
        &self,
        item_id: QueueItemId,
        error: String,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queue.mark_cancelled(item_id, &error, now).await })
    }

    fn record_log(
        &self,
        entry: NewLogEntry,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.delivery_logs.create(&entry, now).await.map(|_| ()) })
    }

    fn record_subscription_attempt(
        &self,
        id: SubscriptionId,
        succeeded: bool,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.subscriptions.record_attempt(id, succeeded, now).await })
    }

    fn purge_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queue.purge_terminal_before(cutoff).await })
    }

    fn reclaim_stuck(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueItemId>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queue.reclaim_stuck(cutoff).await })
    }

    fn find_item(
        &self,
        item_id: QueueItemId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<QueueItem>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.queue.find_by_id(item_id).await })
    }
}

pub mod mock {
    //! Mock storage implementation for testing.
    //!
    //! In-memory state with the same claim semantics as the database: a
    //! claimed item moves to processing and cannot be claimed again.
    //! Supports injected claim failures and direct state inspection.

    use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

    use chrono::{DateTime, Utc};
    use hookrelay_core::{
        error::{CoreError, Result},
        models::{QueueItem, QueueItemId, QueueStatus, Subscription, SubscriptionId},
    };
    use tokio::sync::RwLock;

    use super::{DeliveryStorage, NewLogEntry};

    /// A delivery log entry as recorded by the mock.
    #[derive(Debug, Clone)]
    pub struct RecordedLog {
        /// The entry handed to `record_log`.
        pub entry: NewLogEntry,
        /// The timestamp it was recorded with.
        pub attempted_at: DateTime<Utc>,
    }

    /// Mock storage for testing delivery logic without a database.
    pub struct MockDeliveryStorage {
        items: Arc<RwLock<HashMap<QueueItemId, QueueItem>>>,
        subscriptions: Arc<RwLock<HashMap<SubscriptionId, Subscription>>>,
        logs: Arc<RwLock<Vec<RecordedLog>>>,
        claim_error: Arc<RwLock<Option<String>>>,
    }

    impl MockDeliveryStorage {
        /// Creates a new mock storage with empty state.
        pub fn new() -> Self {
            Self {
                items: Arc::new(RwLock::new(HashMap::new())),
                subscriptions: Arc::new(RwLock::new(HashMap::new())),
                logs: Arc::new(RwLock::new(Vec::new())),
                claim_error: Arc::new(RwLock::new(None)),
            }
        }

        /// Adds a queue item in whatever status it carries.
        pub async fn add_item(&self, item: QueueItem) {
            self.items.write().await.insert(item.id, item);
        }

        /// Adds a subscription.
        pub async fn add_subscription(&self, subscription: Subscription) {
            self.subscriptions.write().await.insert(subscription.id, subscription);
        }

        /// Injects an error for the next claim operation.
        pub async fn inject_claim_error(&self, error: impl Into<String>) {
            *self.claim_error.write().await = Some(error.into());
        }

        /// Returns all recorded delivery log entries, in recording order.
        pub async fn recorded_logs(&self) -> Vec<RecordedLog> {
            self.logs.read().await.clone()
        }

        /// Returns the current state of a queue item.
        pub async fn item(&self, item_id: QueueItemId) -> Option<QueueItem> {
            self.items.read().await.get(&item_id).cloned()
        }

        /// Returns the current state of a subscription.
        pub async fn subscription(&self, id: SubscriptionId) -> Option<Subscription> {
            self.subscriptions.read().await.get(&id).cloned()
        }

        /// Verifies a queue item reached the expected status.
        pub async fn verify_item_status(&self, item_id: QueueItemId, expected: QueueStatus) -> bool {
            self.items.read().await.get(&item_id).is_some_and(|i| i.status == expected)
        }
    }

    impl Default for MockDeliveryStorage {
        fn default() -> Self {
            Self::new()
        }
    }

    impl DeliveryStorage for MockDeliveryStorage {
        fn claim_due(
            &self,
            batch_size: usize,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueItem>>> + Send + '_>> {
            let claim_error = self.claim_error.clone();
            let items = self.items.clone();

            Box::pin(async move {
                if let Some(error) = claim_error.write().await.take() {
                    return Err(CoreError::Database(error));
                }

                let mut items = items.write().await;

                // FIFO by enqueue time, like the database claim.
                let mut due: Vec<(DateTime<Utc>, QueueItemId)> = items
                    .values()
                    .filter(|i| i.status == QueueStatus::Pending && i.scheduled_for <= now)
                    .map(|i| (i.created_at, i.id))
                    .collect();
                due.sort_by_key(|(created_at, _)| *created_at);
                due.truncate(batch_size);

                let mut claimed = Vec::with_capacity(due.len());
                for (_, id) in due {
                    if let Some(item) = items.get_mut(&id) {
                        item.status = QueueStatus::Processing;
                        item.started_at = Some(now);
                        claimed.push(item.clone());
                    }
                }

                Ok(claimed)
            })
        }

        fn find_subscription(
            &self,
            id: SubscriptionId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Subscription>>> + Send + '_>> {
            let subscriptions = self.subscriptions.clone();
            Box::pin(async move { Ok(subscriptions.read().await.get(&id).cloned()) })
        }

        fn mark_completed(
            &self,
            item_id: QueueItemId,
            status_code: i32,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let items = self.items.clone();
            Box::pin(async move {
                if let Some(item) = items.write().await.get_mut(&item_id) {
                    item.status = QueueStatus::Completed;
                    item.status_code = Some(status_code);
                    item.completed_at = Some(now);
                    item.error = None;
                }
                Ok(())
            })
        }

        fn mark_failed(
            &self,
            item_id: QueueItemId,
            status_code: i32,
            error: String,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let items = self.items.clone();
            Box::pin(async move {
                if let Some(item) = items.write().await.get_mut(&item_id) {
                    item.status = QueueStatus::Failed;
                    item.status_code = Some(status_code);
                    item.error = Some(error);
                    item.completed_at = Some(now);
                }
                Ok(())
            })
        }

        fn mark_cancelled(
            &self,
            item_id: QueueItemId,
            error: String,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let items = self.items.clone();
            Box::pin(async move {
                if let Some(item) = items.write().await.get_mut(&item_id) {
                    item.status = QueueStatus::Cancelled;
                    item.error = Some(error);
                    item.completed_at = Some(now);
                }
                Ok(())
            })
        }

        fn record_log(
            &self,
            entry: NewLogEntry,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let logs = self.logs.clone();
            Box::pin(async move {
                logs.write().await.push(RecordedLog { entry, attempted_at: now });
                Ok(())
            })
        }

        fn record_subscription_attempt(
            &self,
            id: SubscriptionId,
            succeeded: bool,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let subscriptions = self.subscriptions.clone();
            Box::pin(async move {
                if let Some(sub) = subscriptions.write().await.get_mut(&id) {
                    sub.total_calls += 1;
                    if succeeded {
                        sub.successful_calls += 1;
                    } else {
                        sub.failed_calls += 1;
                    }
                    sub.last_called_at = Some(now);
                }
                Ok(())
            })
        }

        fn purge_terminal_before(
            &self,
            cutoff: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
            let items = self.items.clone();
            Box::pin(async move {
                let mut items = items.write().await;
                let before = items.len();
                items.retain(|_, item| !(item.status.is_terminal() && item.created_at < cutoff));
                Ok((before - items.len()) as u64)
            })
        }

        fn reclaim_stuck(
            &self,
            cutoff: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueItemId>>> + Send + '_>> {
            let items = self.items.clone();
            Box::pin(async move {
                let mut reclaimed = Vec::new();
                for item in items.write().await.values_mut() {
                    if item.status == QueueStatus::Processing
                        && item.started_at.is_some_and(|at| at < cutoff)
                    {
                        item.status = QueueStatus::Pending;
                        item.started_at = None;
                        reclaimed.push(item.id);
                    }
                }
                Ok(reclaimed)
            })
        }

        fn find_item(
            &self,
            item_id: QueueItemId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<QueueItem>>> + Send + '_>> {
            let items = self.items.clone();
            Box::pin(async move { Ok(items.read().await.get(&item_id).cloned()) })
        }
    }
}
