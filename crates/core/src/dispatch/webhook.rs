//! Webhook delivery with linear-backoff retry.
//!
//! [`HttpWebhookSender`] POSTs a JSON payload to an endpoint. When the
//! endpoint has a shared secret the body is signed with HMAC-SHA256 and the
//! hex digest sent in `X-Signature`. Attempt `n` that fails is followed by a
//! pause of `n * backoff` before the next one.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::StoreError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the request body.
pub const SIGNATURE_HEADER: &str = "X-Signature";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A site's registered webhook target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub site_id: Uuid,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    /// Subscribed event types. Empty means every type.
    pub events: Vec<String>,
    pub active: bool,
}

impl WebhookEndpoint {
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.active && (self.events.is_empty() || self.events.iter().any(|e| e == event_type))
    }
}

/// JSON body POSTed to webhook endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    pub site_id: Uuid,
    pub page_id: Uuid,
    pub revision_id: Option<Uuid>,
    pub data: Value,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Delivered => "DELIVERED",
            Self::Failed => "FAILED",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "DELIVERED" => Ok(Self::Delivered),
            "FAILED" => Ok(Self::Failed),
            other => Err(StoreError::Corrupt(format!("unknown delivery status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewWebhookDelivery {
    pub webhook_id: Uuid,
    pub event_type: String,
    pub payload: Value,
}

/// A recorded delivery, PENDING until the sender finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub status: DeliveryStatus,
    pub response_code: Option<i32>,
    pub error: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Final result of sending one payload to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub status: DeliveryStatus,
    pub response_code: Option<u16>,
    pub error: Option<String>,
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// Network, DNS, timeout.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),

    #[error("invalid signing key")]
    InvalidKey,
}

impl WebhookError {
    fn response_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus(code) => Some(*code),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            Self::InvalidKey => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// Hex HMAC-SHA256 of `body` keyed with `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::InvalidKey)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Sends a serialized payload to one endpoint and reports what happened.
///
/// Implementations never fail: every problem is folded into the outcome.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, endpoint: &WebhookEndpoint, body: &[u8]) -> DeliveryOutcome;
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Base pause between attempts, multiplied by the attempt number.
    pub backoff: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Delivers webhooks over HTTP with `reqwest`.
pub struct HttpWebhookSender {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl HttpWebhookSender {
    pub fn new(config: WebhookConfig) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    async fn try_send(&self, endpoint: &WebhookEndpoint, body: &[u8]) -> Result<u16, WebhookError> {
        let mut request = self
            .client
            .post(&endpoint.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some(secret) = endpoint.secret.as_deref().filter(|s| !s.is_empty()) {
            request = request.header(SIGNATURE_HEADER, sign(secret, body)?);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::HttpStatus(status.as_u16()));
        }
        Ok(status.as_u16())
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, endpoint: &WebhookEndpoint, body: &[u8]) -> DeliveryOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.try_send(endpoint, body).await {
                Ok(code) => {
                    return DeliveryOutcome {
                        status: DeliveryStatus::Delivered,
                        response_code: Some(code),
                        error: None,
                        attempts: attempt,
                    };
                }
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(
                        attempt,
                        webhook_id = %endpoint.id,
                        url = %endpoint.url,
                        error = %e,
                        "Webhook delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(self.config.backoff * attempt).await;
                }
                Err(e) => {
                    tracing::error!(
                        webhook_id = %endpoint.id,
                        url = %endpoint.url,
                        attempts = attempt,
                        error = %e,
                        "Webhook delivery failed after all retries"
                    );
                    return DeliveryOutcome {
                        status: DeliveryStatus::Failed,
                        response_code: e.response_code(),
                        error: Some(e.to_string()),
                        attempts: attempt,
                    };
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
