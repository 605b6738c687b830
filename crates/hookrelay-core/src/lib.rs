//! Domain models and persistence for the webhook delivery pipeline.
//!
//! Defines the queue item state machine, subscription records with running
//! delivery counters, the append-only delivery log, and the repository-based
//! storage layer the delivery engine and enqueuing collaborators share.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    DeliveryLogEntry, NewQueueItem, QueueItem, QueueItemId, QueueStatus, Subscription,
    SubscriptionId, SubscriptionSummary,
};
pub use time::{Clock, RealClock, TestClock};
