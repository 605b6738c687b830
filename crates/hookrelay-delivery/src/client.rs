//! HTTP client for webhook delivery with configurable timeouts.
//!
//! Builds the outgoing request from a claimed queue item: protocol headers,
//! subscriber-configured custom headers, and the HMAC signature over the
//! request body.

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::error::{DeliveryError, Result};

/// Header naming the domain event, e.g. `TASK_CREATED`.
pub const HEADER_EVENT: &str = "X-Webhook-Event";
/// Header carrying the enqueue timestamp in RFC 3339.
pub const HEADER_TIMESTAMP: &str = "X-Webhook-Timestamp";
/// Header carrying the HMAC-SHA256 signature of the body.
pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for the complete HTTP request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: "HookRelay/1.0".to_string(),
        }
    }
}

/// One outgoing webhook request, fully resolved from a claimed queue item
/// and its subscription.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Queue item being delivered; used for tracing only.
    pub item_id: Uuid,
    /// Destination URL.
    pub url: String,
    /// Domain event name; sent as `X-Webhook-Event`.
    pub event: String,
    /// Request body. The signature, when present, covers exactly these
    /// bytes.
    pub body: Bytes,
    /// Enqueue timestamp; sent as `X-Webhook-Timestamp`.
    pub created_at: DateTime<Utc>,
    /// Precomputed signature header value, absent for unsigned
    /// subscriptions.
    pub signature: Option<String>,
    /// Subscriber-configured headers. Applied after the protocol headers,
    /// so they win when names collide.
    pub custom_headers: HashMap<String, String>,
}

/// Outcome of a webhook delivery attempt that obtained an HTTP response.
///
/// Connection-level failures (timeout, refused connection) surface as
/// [`DeliveryError`] instead.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated for audit storage.
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
    /// Whether the status code was 2xx.
    pub is_success: bool,
}

/// HTTP client for webhook dispatch.
///
/// Wraps a pooled `reqwest::Client` so concurrent deliveries within a poll
/// cycle share connections. Success is decided solely by the status code
/// class; a 3xx or 4xx response is a failed delivery, not an error.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Configured request timeout in seconds.
    pub fn timeout_seconds(&self) -> u64 {
        self.config.timeout.as_secs()
    }

    /// Sends one webhook POST and waits for the response.
    ///
    /// # Errors
    ///
    /// - `Timeout` when the request exceeds the configured timeout
    /// - `Network` for connection failures and other transport errors
    ///
    /// A response with any status code is `Ok`; the caller decides success
    /// from `is_success`.
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        let start_time = std::time::Instant::now();

        let span = info_span!(
            "webhook_delivery",
            item_id = %request.item_id,
            event = %request.event,
            url = %request.url,
        );

        async move {
            let headers = build_headers(&request);

            let response = match self
                .client
                .post(&request.url)
                .headers(headers)
                .body(request.body.clone())
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {e}");

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let duration = start_time.elapsed();
            let status_code = response.status().as_u16();
            let is_success = response.status().is_success();

            let body = read_body_truncated(response).await;

            if is_success {
                tracing::debug!(status = status_code, duration_ms = duration.as_millis(), "delivered");
            } else {
                tracing::warn!(
                    status = status_code,
                    duration_ms = duration.as_millis(),
                    "non-success response"
                );
            }

            Ok(DeliveryResponse { status_code, body, duration, is_success })
        }
        .instrument(span)
        .await
    }
}

/// Assembles the outgoing header map.
///
/// Protocol headers first, then the subscriber's custom headers. `insert`
/// replaces, so a custom header overrides a protocol header of the same
/// name.
fn build_headers(request: &DeliveryRequest) -> HeaderMap {
    let mut headers = HeaderMap::new();

    headers.insert(reqwest::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

    insert_header(&mut headers, HEADER_EVENT, &request.event);
    insert_header(&mut headers, HEADER_TIMESTAMP, &request.created_at.to_rfc3339());

    if let Some(signature) = &request.signature {
        insert_header(&mut headers, HEADER_SIGNATURE, signature);
    }

    for (name, value) in &request.custom_headers {
        insert_header(&mut headers, name, value);
    }

    headers
}

/// Inserts a header, skipping names or values reqwest cannot represent.
fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        },
        _ => {
            tracing::warn!(header = name, "skipping invalid header");
        },
    }
}

/// Reads the response body, truncating oversized bodies for audit storage.
async fn read_body_truncated(response: reqwest::Response) -> String {
    const MAX_AUDIT_SIZE: usize = 1024;

    match response.bytes().await {
        Ok(bytes) => {
            if bytes.len() > MAX_AUDIT_SIZE {
                let suffix = "... (truncated)";
                let truncated = String::from_utf8_lossy(&bytes[..MAX_AUDIT_SIZE - suffix.len()]);
                format!("{truncated}{suffix}")
            } else {
                String::from_utf8_lossy(&bytes).into_owned()
            }
        },
        Err(e) => {
            tracing::warn!("failed to read response body: {e}");
            format!("[failed to read response body: {e}]")
        },
    }
}
