//! Domain models and strongly-typed identifiers.
//!
//! Defines webhook subscriptions, queue items, delivery log entries, and
//! newtype ID wrappers for compile-time type safety. Includes database
//! serialization traits and the status state machine for the delivery queue.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed subscription identifier.
///
/// Wraps a UUID to prevent mixing with queue item IDs. A subscription ID is
/// assigned at registration and is immutable for the subscription's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Creates a new random subscription ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for SubscriptionId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for SubscriptionId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for SubscriptionId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed queue item identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueItemId(pub Uuid);

impl QueueItemId {
    /// Creates a new random queue item ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for QueueItemId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for QueueItemId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for QueueItemId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for QueueItemId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Queue item lifecycle status.
///
/// Items progress through these states during processing. State transitions
/// are strictly controlled:
///
/// ```text
/// Pending -> Processing -> Completed
///                       -> Failed
///                       -> Cancelled
/// ```
///
/// Processing is entered exactly once, when a poller cycle claims the item.
/// Completed, Failed, and Cancelled are terminal; no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be claimed by a poller cycle.
    Pending,

    /// Claimed by a poller cycle; delivery in progress.
    ///
    /// The claim barrier: an item in this state cannot be claimed again.
    Processing,

    /// Delivery attempt succeeded (2xx response). Terminal.
    Completed,

    /// Delivery attempt failed (non-2xx, timeout, or connection error).
    /// Terminal; this subsystem never retries a failed item.
    Failed,

    /// Skipped without a delivery attempt because the subscription was
    /// missing or inactive at claim time. Terminal.
    Cancelled,
}

impl QueueStatus {
    /// Whether this status is terminal (no further transitions).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine permits a transition to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Cancelled)
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl sqlx::Type<PgDb> for QueueStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for QueueStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid queue status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for QueueStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// A registered webhook subscriber.
///
/// Defines where notifications are delivered and how requests are signed.
/// Counters are maintained by the delivery engine; one row per target URL.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    /// Unique identifier for this subscription.
    pub id: SubscriptionId,

    /// Target URL for webhook delivery. Unique across subscriptions.
    pub url: String,

    /// Shared secret for HMAC-SHA256 signing.
    ///
    /// Deliveries are unsigned when absent or empty. Never exposed by read
    /// interfaces; see [`SubscriptionSummary`].
    pub secret: Option<String>,

    /// Custom headers sent with every delivery.
    ///
    /// Applied after the protocol headers, so a custom header wins when the
    /// names collide.
    pub headers: sqlx::types::Json<HashMap<String, String>>,

    /// Event names this subscriber cares about.
    ///
    /// Consulted by the enqueuing collaborator during fan-out, never by the
    /// delivery engine itself.
    pub events: sqlx::types::Json<Vec<String>>,

    /// Inactive subscriptions have their queued items cancelled at claim
    /// time instead of delivered.
    pub is_active: bool,

    /// Total delivery attempts made.
    pub total_calls: i64,

    /// Attempts that received a 2xx response.
    pub successful_calls: i64,

    /// Attempts that did not receive a 2xx response.
    pub failed_calls: i64,

    /// When the most recent attempt was made.
    pub last_called_at: Option<DateTime<Utc>>,

    /// When this subscription was created.
    pub created_at: DateTime<Utc>,

    /// When configuration was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether this subscription is subscribed to the given event name.
    pub fn is_subscribed(&self, event: &str) -> bool {
        self.events.0.iter().any(|e| e == event)
    }

    /// Signing secret, if one is configured and non-empty.
    pub fn signing_secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Reporting view of this subscription with the secret omitted.
    pub fn summary(&self) -> SubscriptionSummary {
        SubscriptionSummary {
            id: self.id,
            url: self.url.clone(),
            headers: self.headers.0.clone(),
            events: self.events.0.clone(),
            is_active: self.is_active,
            total_calls: self.total_calls,
            successful_calls: self.successful_calls,
            failed_calls: self.failed_calls,
            last_called_at: self.last_called_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Subscription record as exposed to reporting collaborators.
///
/// Identical to [`Subscription`] minus the signing secret, which must never
/// leave the delivery subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSummary {
    /// Unique identifier for this subscription.
    pub id: SubscriptionId,
    /// Target URL for webhook delivery.
    pub url: String,
    /// Custom headers sent with every delivery.
    pub headers: HashMap<String, String>,
    /// Subscribed event names.
    pub events: Vec<String>,
    /// Whether the subscription currently receives deliveries.
    pub is_active: bool,
    /// Total delivery attempts made.
    pub total_calls: i64,
    /// Attempts that received a 2xx response.
    pub successful_calls: i64,
    /// Attempts that did not receive a 2xx response.
    pub failed_calls: i64,
    /// When the most recent attempt was made.
    pub last_called_at: Option<DateTime<Utc>>,
    /// When this subscription was created.
    pub created_at: DateTime<Utc>,
    /// When configuration was last modified.
    pub updated_at: DateTime<Utc>,
}

/// One pending, in-flight, or settled notification for one subscription.
///
/// Created by the enqueue interface, mutated only by the delivery engine,
/// and eventually purged by the retention sweeper once terminal.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueItem {
    /// Unique identifier for this item.
    pub id: QueueItemId,

    /// Subscription this notification is destined for.
    pub subscription_id: SubscriptionId,

    /// Domain event name, e.g. `TASK_CREATED`.
    pub event: String,

    /// JSON payload delivered as the request body.
    pub payload: sqlx::types::Json<serde_json::Value>,

    /// Current position in the state machine.
    pub status: QueueStatus,

    /// Delivery must not start before this time.
    pub scheduled_for: DateTime<Utc>,

    /// When the item was enqueued. Drives FIFO claim order and the
    /// `X-Webhook-Timestamp` header.
    pub created_at: DateTime<Utc>,

    /// When a poller cycle claimed the item (Processing entered).
    pub started_at: Option<DateTime<Utc>>,

    /// When the item reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,

    /// HTTP status code of the delivery attempt; 0 when no response was
    /// obtained (timeout, connection failure).
    pub status_code: Option<i32>,

    /// Human-readable error for Failed and Cancelled items.
    pub error: Option<String>,
}

impl QueueItem {
    /// Serializes the payload to the exact bytes placed on the wire.
    ///
    /// Signing and the request body must use the same serialization pass so
    /// the receiver can verify the signature against the bytes it received.
    pub fn payload_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.payload.0).unwrap_or_default()
    }
}

/// Request to enqueue one notification, submitted by external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQueueItem {
    /// Target subscription.
    pub subscription_id: SubscriptionId,
    /// Domain event name.
    pub event: String,
    /// JSON payload to deliver.
    pub payload: serde_json::Value,
    /// Earliest delivery time; defaults to now when absent.
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Append-only audit record of one delivery attempt.
///
/// Created once per attempted (non-cancelled) queue item, success or not.
/// Never modified after insertion.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryLogEntry {
    /// Unique identifier for this entry.
    pub id: Uuid,

    /// Subscription the attempt was made for.
    pub subscription_id: SubscriptionId,

    /// Domain event name.
    pub event: String,

    /// Target URL at the time of the attempt.
    ///
    /// Recorded separately because the subscription URL can change later.
    pub url: String,

    /// Payload that was delivered.
    pub payload: sqlx::types::Json<serde_json::Value>,

    /// HTTP status code; 0 for connection-level failures.
    pub status_code: i32,

    /// Whether the attempt received a 2xx response.
    pub succeeded: bool,

    /// Human-readable error description for failed attempts.
    pub error: Option<String>,

    /// Wall-clock duration of the attempt in milliseconds.
    pub duration_ms: i64,

    /// When the attempt was made.
    pub attempted_at: DateTime<Utc>,
}
