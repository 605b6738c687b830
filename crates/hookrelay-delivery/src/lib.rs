//! Webhook delivery engine.
//!
//! Processes the durable notification queue: a poller claims due items in
//! FIFO batches with a database-level claim barrier, delivers them
//! concurrently over HTTP with HMAC-SHA256 signing, and records every
//! outcome on the queue item, the delivery log, and the subscription
//! counters. A companion sweeper enforces the retention horizon and rescues
//! items stranded by crashed delivery tasks.
//!
//! # Architecture
//!
//! 1. **Claim** - `FOR UPDATE SKIP LOCKED` moves a batch to processing
//! 2. **Resolve** - inactive or missing subscriptions cancel their items
//! 3. **Deliver** - signed POST with a hard timeout, batch-bounded fan-out
//! 4. **Record** - terminal status, audit log entry, counter updates
//!
//! Failed deliveries are terminal; this engine never retries an item.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hookrelay_core::RealClock;
//! use hookrelay_delivery::{
//!     DeliveryError, PollerConfig, PostgresDeliveryStorage, QueuePoller,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(
//! #     storage: Arc<hookrelay_core::storage::Storage>,
//! # ) -> Result<(), DeliveryError> {
//! let delivery_storage = Arc::new(PostgresDeliveryStorage::new(storage));
//! let poller = QueuePoller::new(
//!     delivery_storage,
//!     PollerConfig::default(),
//!     Arc::new(RealClock::new()),
//!     CancellationToken::new(),
//! )?;
//!
//! poller.run().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod poller;
pub mod signature;
pub mod storage;
pub mod sweeper;

pub use client::{ClientConfig, DeliveryClient, DeliveryRequest, DeliveryResponse};
pub use error::{DeliveryError, Result};
pub use poller::{PollerConfig, PollerStats, QueuePoller};
pub use storage::{DeliveryStorage, PostgresDeliveryStorage};
pub use sweeper::{RetentionSweeper, SweepReport, SweeperConfig};

/// Default maximum items claimed per poll cycle.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default seconds between poll cycles.
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Default seconds between retention sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60 * 60;

/// Default retention horizon for terminal queue items in seconds.
pub const DEFAULT_RETENTION_SECONDS: u64 = 7 * 24 * 60 * 60;
