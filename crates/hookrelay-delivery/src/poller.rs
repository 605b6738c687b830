//! Queue poller driving the delivery pipeline.
//!
//! A single poller loop claims due pending items in FIFO batches and fans
//! each batch out to concurrent delivery tasks. Concurrency is bounded by
//! the batch size; one item's failure never affects its batch peers. Each
//! claimed item settles in exactly one terminal state before the cycle ends.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use hookrelay_core::{
    models::{QueueItem, Subscription},
    storage::delivery_logs::NewLogEntry,
    Clock,
};
use serde::{Deserialize, Serialize};
use tokio::{sync::RwLock, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{ClientConfig, DeliveryClient, DeliveryRequest},
    error::{DeliveryError, Result},
    signature,
    storage::DeliveryStorage,
};

/// Error recorded on items cancelled at claim time.
const CANCELLED_ERROR: &str = "subscription not found or inactive";

/// Configuration for the queue poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Maximum items claimed per cycle; also the delivery concurrency bound.
    pub batch_size: usize,

    /// How long to wait between poll cycles.
    pub poll_interval: Duration,

    /// HTTP client configuration.
    pub client_config: ClientConfig,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(crate::DEFAULT_POLL_INTERVAL_SECONDS),
            client_config: ClientConfig::default(),
        }
    }
}

/// Counters for poller monitoring.
#[derive(Debug, Clone, Default)]
pub struct PollerStats {
    /// Poll cycles completed.
    pub cycles: u64,
    /// Items claimed and settled.
    pub items_processed: u64,
    /// Items that received a 2xx response.
    pub successful_deliveries: u64,
    /// Items that failed delivery.
    pub failed_deliveries: u64,
    /// Items cancelled without an attempt.
    pub cancelled_items: u64,
}

/// Terminal outcome of processing one claimed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Delivered,
    Failed,
    Cancelled,
}

/// Polling delivery worker.
///
/// Owns its timers and HTTP client; multiple pollers can run against the
/// same database because the claim barrier keeps their batches disjoint.
pub struct QueuePoller {
    ctx: Arc<DeliveryContext>,
    config: PollerConfig,
    stats: Arc<RwLock<PollerStats>>,
    cancellation_token: CancellationToken,
}

/// Shared state each spawned delivery task needs.
struct DeliveryContext {
    storage: Arc<dyn DeliveryStorage>,
    client: DeliveryClient,
    clock: Arc<dyn Clock>,
}

impl QueuePoller {
    /// Creates a new poller.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(
        storage: Arc<dyn DeliveryStorage>,
        config: PollerConfig,
        clock: Arc<dyn Clock>,
        cancellation_token: CancellationToken,
    ) -> Result<Self> {
        let client = DeliveryClient::new(config.client_config.clone())?;

        Ok(Self {
            ctx: Arc::new(DeliveryContext { storage, client, clock }),
            config,
            stats: Arc::new(RwLock::new(PollerStats::default())),
            cancellation_token,
        })
    }

    /// Returns current poller statistics.
    pub async fn stats(&self) -> PollerStats {
        self.stats.read().await.clone()
    }

    /// Main poll loop. Runs cycles until cancelled.
    ///
    /// Cycle errors (claim failures, database outages) are logged and the
    /// loop continues at the next interval; the poller only exits on
    /// cancellation. In-flight deliveries of the current cycle complete
    /// before the loop observes cancellation.
    pub async fn run(&self) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "queue poller starting"
        );

        loop {
            tokio::select! {
                () = self.ctx.clock.sleep(self.config.poll_interval) => {}
                () = self.cancellation_token.cancelled() => break,
            }

            if let Err(error) = self.run_cycle().await {
                error!(error = %error, "poll cycle failed");
            }
        }

        info!("queue poller stopped");
    }

    /// Claims one batch and settles every claimed item.
    ///
    /// Also usable directly for controlled single-cycle processing in tests.
    ///
    /// # Errors
    ///
    /// Returns error only if claiming fails; per-item failures are recorded
    /// as item outcomes, not surfaced here.
    pub async fn run_cycle(&self) -> Result<usize> {
        let now = self.ctx.clock.now_utc();

        let items = self
            .ctx
            .storage
            .claim_due(self.config.batch_size, now)
            .await
            .map_err(|e| DeliveryError::database(format!("failed to claim due items: {e}")))?;

        let claimed = items.len();
        if claimed == 0 {
            self.stats.write().await.cycles += 1;
            return Ok(0);
        }

        debug!(claimed, "processing claimed batch");

        let mut tasks = JoinSet::new();
        for item in items {
            let ctx = self.ctx.clone();
            tasks.spawn(async move { ctx.process_item(item).await });
        }

        let mut delivered = 0u64;
        let mut failed = 0u64;
        let mut cancelled = 0u64;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(ItemOutcome::Delivered) => delivered += 1,
                Ok(ItemOutcome::Failed) => failed += 1,
                Ok(ItemOutcome::Cancelled) => cancelled += 1,
                Err(join_error) => {
                    // The item stays in processing; the retention sweeper
                    // reclaims it.
                    error!(error = %join_error, "delivery task panicked");
                    failed += 1;
                },
            }
        }

        let mut stats = self.stats.write().await;
        stats.cycles += 1;
        stats.items_processed += claimed as u64;
        stats.successful_deliveries += delivered;
        stats.failed_deliveries += failed;
        stats.cancelled_items += cancelled;

        Ok(claimed)
    }
}

impl DeliveryContext {
    /// Settles one claimed item: cancel, or attempt delivery and record the
    /// outcome on the item, the log, and the subscription counters.
    ///
    /// Storage failures along the way are logged and swallowed so one item
    /// cannot take down its batch.
    async fn process_item(&self, item: QueueItem) -> ItemOutcome {
        let subscription = match self.storage.find_subscription(item.subscription_id).await {
            Ok(Some(sub)) if sub.is_active => sub,
            Ok(_) => return self.cancel_item(&item).await,
            Err(error) => {
                error!(
                    item_id = %item.id,
                    subscription_id = %item.subscription_id,
                    error = %error,
                    "subscription lookup failed, leaving item for reclaim"
                );
                return ItemOutcome::Failed;
            },
        };

        self.attempt_delivery(&item, &subscription).await
    }

    /// Cancels an item whose subscription is gone or inactive.
    ///
    /// No HTTP request, no log entry, no counter changes.
    async fn cancel_item(&self, item: &QueueItem) -> ItemOutcome {
        let now = self.clock.now_utc();

        if let Err(error) =
            self.storage.mark_cancelled(item.id, CANCELLED_ERROR.to_string(), now).await
        {
            error!(item_id = %item.id, error = %error, "failed to mark item cancelled");
        } else {
            info!(
                item_id = %item.id,
                subscription_id = %item.subscription_id,
                "item cancelled: subscription not found or inactive"
            );
        }

        ItemOutcome::Cancelled
    }

    /// Makes the HTTP delivery attempt and records its outcome everywhere.
    async fn attempt_delivery(&self, item: &QueueItem, subscription: &Subscription) -> ItemOutcome {
        let started = self.clock.now();

        // One serialization pass: the signature covers exactly the bytes
        // sent as the body.
        let body = Bytes::from(item.payload_bytes());

        let result = match subscription
            .signing_secret()
            .map(|secret| signature::sign(&body, secret))
            .transpose()
        {
            Ok(signature) => {
                let request = DeliveryRequest {
                    item_id: item.id.0,
                    url: subscription.url.clone(),
                    event: item.event.clone(),
                    body,
                    created_at: item.created_at,
                    signature,
                    custom_headers: subscription.headers.0.clone(),
                };
                self.client.deliver(request).await
            },
            Err(error) => Err(error),
        };

        let now = self.clock.now_utc();

        // status_code 0 means no HTTP response was obtained. A failed
        // attempt still consumed wall-clock time (a timeout burns the whole
        // budget), so the elapsed duration is recorded either way.
        let (status_code, succeeded, error_message, duration) = match &result {
            Ok(response) => (
                i32::from(response.status_code),
                response.is_success,
                if response.is_success {
                    None
                } else {
                    Some(format!("HTTP {}", response.status_code))
                },
                response.duration,
            ),
            Err(error) => (0, false, Some(error.to_string()), started.elapsed()),
        };

        let settle = if succeeded {
            self.storage.mark_completed(item.id, status_code, now).await
        } else {
            self.storage
                .mark_failed(
                    item.id,
                    status_code,
                    error_message.clone().unwrap_or_default(),
                    now,
                )
                .await
        };
        if let Err(error) = settle {
            error!(item_id = %item.id, error = %error, "failed to settle item status");
        }

        let log_entry = NewLogEntry {
            subscription_id: subscription.id,
            event: item.event.clone(),
            url: subscription.url.clone(),
            payload: item.payload.0.clone(),
            status_code,
            succeeded,
            error: error_message.clone(),
            duration_ms: i64::try_from(duration.as_millis()).unwrap_or(i64::MAX),
        };
        if let Err(error) = self.storage.record_log(log_entry, now).await {
            warn!(item_id = %item.id, error = %error, "failed to record delivery log");
        }

        if let Err(error) =
            self.storage.record_subscription_attempt(subscription.id, succeeded, now).await
        {
            warn!(
                subscription_id = %subscription.id,
                error = %error,
                "failed to update subscription counters"
            );
        }

        if succeeded {
            info!(
                item_id = %item.id,
                status_code,
                duration_ms = duration.as_millis(),
                "webhook delivered"
            );
            ItemOutcome::Delivered
        } else {
            warn!(
                item_id = %item.id,
                status_code,
                error = error_message.as_deref().unwrap_or(""),
                "webhook delivery failed"
            );
            ItemOutcome::Failed
        }
    }
}
