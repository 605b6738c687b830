//! Retention sweeper for the delivery queue.
//!
//! Periodically deletes terminal queue items older than the retention
//! horizon and rescues items stranded in processing by a crashed delivery
//! task. Subscriptions and delivery logs are outside its remit.

use std::{sync::Arc, time::Duration};

use chrono::TimeDelta;
use hookrelay_core::Clock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    storage::DeliveryStorage,
};

/// Configuration for the retention sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// How often the sweep runs.
    pub sweep_interval: Duration,

    /// Age past which terminal items are deleted, measured from enqueue
    /// time.
    pub retention: Duration,

    /// How long an item may sit in processing before it is considered
    /// stranded and reset to pending. Must exceed the delivery timeout so a
    /// slow in-flight request is never reclaimed while still running.
    pub stuck_after: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(crate::DEFAULT_SWEEP_INTERVAL_SECONDS),
            retention: Duration::from_secs(crate::DEFAULT_RETENTION_SECONDS),
            stuck_after: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS + 60),
        }
    }
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Terminal items deleted.
    pub purged: u64,
    /// Stranded processing items reset to pending.
    pub reclaimed: u64,
}

/// Background worker enforcing queue retention.
pub struct RetentionSweeper {
    storage: Arc<dyn DeliveryStorage>,
    config: SweeperConfig,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
}

impl RetentionSweeper {
    /// Creates a new sweeper.
    pub fn new(
        storage: Arc<dyn DeliveryStorage>,
        config: SweeperConfig,
        clock: Arc<dyn Clock>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { storage, config, clock, cancellation_token }
    }

    /// Main sweep loop. Runs until cancelled.
    ///
    /// Sweep errors are logged and the loop continues at the next interval.
    pub async fn run(&self) {
        info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            retention_secs = self.config.retention.as_secs(),
            "retention sweeper starting"
        );

        loop {
            tokio::select! {
                () = self.clock.sleep(self.config.sweep_interval) => {}
                () = self.cancellation_token.cancelled() => break,
            }

            match self.sweep_once().await {
                Ok(report) => {
                    if report.purged > 0 || report.reclaimed > 0 {
                        info!(
                            purged = report.purged,
                            reclaimed = report.reclaimed,
                            "sweep completed"
                        );
                    } else {
                        debug!("sweep completed, nothing to do");
                    }
                },
                Err(error) => {
                    error!(error = %error, "sweep failed");
                },
            }
        }

        info!("retention sweeper stopped");
    }

    /// Runs one purge-and-reclaim pass.
    ///
    /// # Errors
    ///
    /// Returns error if either storage operation fails.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let now = self.clock.now_utc();

        let retention_cutoff = now
            - TimeDelta::from_std(self.config.retention)
                .unwrap_or_else(|_| TimeDelta::try_days(7).unwrap_or_default());
        let purged = self
            .storage
            .purge_terminal_before(retention_cutoff)
            .await
            .map_err(|e| DeliveryError::database(format!("failed to purge queue: {e}")))?;

        let stuck_cutoff = now
            - TimeDelta::from_std(self.config.stuck_after)
                .unwrap_or_else(|_| TimeDelta::try_seconds(90).unwrap_or_default());
        let reclaimed_ids = self
            .storage
            .reclaim_stuck(stuck_cutoff)
            .await
            .map_err(|e| DeliveryError::database(format!("failed to reclaim stuck items: {e}")))?;

        for item_id in &reclaimed_ids {
            warn!(item_id = %item_id, "reclaimed item stranded in processing");
        }

        Ok(SweepReport { purged, reclaimed: reclaimed_ids.len() as u64 })
    }
}
