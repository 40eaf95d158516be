//! Signed webhook delivery.
//!
//! Every outbound event is wrapped in a fixed envelope, signed with
//! HMAC-SHA256 over the exact serialized bytes sent, and POSTed to the
//! subscriber with the lowercase-hex signature in the `X-Webhook-Signature`
//! header. Delivery failures are absorbed by the failure-count policy and
//! never surface to the caller; fan-out across an agent's subscriptions runs
//! concurrently with each delivery isolated from the others.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DeliveryError, ServiceError, StorageError, ValidationError};
use crate::models::{SubscriptionStatus, WebhookSubscription};
use crate::webhooks::store::WebhookStore;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Outbound wire envelope. Field order is part of the wire contract: the
/// signature covers these exact serialized bytes.
#[derive(Debug, Serialize)]
struct WebhookEnvelope<'a> {
    webhook_id: &'a str,
    event: &'a str,
    data: &'a serde_json::Value,
    timestamp: String,
}

/// Minimal HTTP contract the delivery path needs from a transport.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        body: &[u8],
        headers: &[(String, String)],
    ) -> Result<u16, DeliveryError>;
}

/// reqwest-backed transport with a bounded per-delivery timeout, so a
/// hanging subscriber cannot stall the rest of a fan-out.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("FieldPay/1.0 (webhook delivery)")
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        body: &[u8],
        headers: &[(String, String)],
    ) -> Result<u16, DeliveryError> {
        let mut request = self.client.post(url).body(body.to_vec());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(response.status().as_u16())
    }
}

/// Result of one delivery attempt
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(DeliveryError),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

pub struct WebhookService {
    store: Arc<WebhookStore>,
    transport: Arc<dyn WebhookTransport>,
    failure_limit: i64,
}

impl WebhookService {
    pub fn new(
        store: Arc<WebhookStore>,
        transport: Arc<dyn WebhookTransport>,
        failure_limit: i64,
    ) -> Self {
        Self {
            store,
            transport,
            failure_limit,
        }
    }

    /// Register a new endpoint for the agent. The signing secret carries 256
    /// bits of OS entropy; re-subscribing after deactivation always creates
    /// a fresh row with a fresh secret.
    pub fn subscribe(
        &self,
        agent_id: &str,
        url: &str,
    ) -> Result<WebhookSubscription, ServiceError> {
        if reqwest::Url::parse(url).is_err() {
            return Err(ValidationError::InvalidUrl(url.to_string()).into());
        }

        let now = Utc::now();
        let subscription = WebhookSubscription {
            webhook_id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            url: url.to_string(),
            status: SubscriptionStatus::Active,
            secret: generate_secret(),
            failure_count: 0,
            created_at: now,
            updated_at: now,
        };

        self.store.insert(&subscription)?;
        debug!(agent_id, webhook_id = %subscription.webhook_id, "webhook subscription created");
        Ok(subscription)
    }

    /// All subscriptions for an agent, active and inactive.
    pub fn subscriptions(&self, agent_id: &str) -> Result<Vec<WebhookSubscription>, StorageError> {
        self.store.all_for_agent(agent_id)
    }

    /// Hard delete on explicit agent request.
    pub fn unsubscribe(&self, webhook_id: &str, agent_id: &str) -> Result<bool, StorageError> {
        self.store.delete(webhook_id, agent_id)
    }

    /// Deliver one event to one subscription. Never raises: the outcome is
    /// returned for observability and the failure policy runs internally.
    pub async fn notify(
        &self,
        subscription: &WebhookSubscription,
        event: &str,
        data: &serde_json::Value,
    ) -> DeliveryOutcome {
        let envelope = WebhookEnvelope {
            webhook_id: &subscription.webhook_id,
            event,
            data,
            timestamp: Utc::now().to_rfc3339(),
        };

        let body = match serde_json::to_vec(&envelope) {
            Ok(body) => body,
            Err(e) => {
                // Nothing was sent; an unserializable payload is not a
                // subscriber failure, so the counter is left untouched.
                warn!(webhook_id = %subscription.webhook_id, error = %e, "envelope serialization failed");
                return DeliveryOutcome::Failed(DeliveryError::Payload(e.to_string()));
            }
        };

        let signature = match sign(&subscription.secret, &body) {
            Ok(signature) => signature,
            Err(e) => {
                warn!(webhook_id = %subscription.webhook_id, error = %e, "payload signing failed");
                return DeliveryOutcome::Failed(e);
            }
        };

        let headers = [
            ("Content-Type".to_string(), "application/json".to_string()),
            (SIGNATURE_HEADER.to_string(), signature),
        ];

        let result = self
            .transport
            .post(&subscription.url, &body, &headers)
            .await;

        match result {
            Ok(status) if (200..300).contains(&status) => {
                if let Err(e) = self.store.record_success(&subscription.webhook_id) {
                    warn!(webhook_id = %subscription.webhook_id, error = %e, "failed to reset failure count");
                }
                debug!(webhook_id = %subscription.webhook_id, event, "webhook delivered");
                DeliveryOutcome::Delivered
            }
            Ok(status) => {
                self.count_failure(&subscription.webhook_id, event);
                DeliveryOutcome::Failed(DeliveryError::Status(status))
            }
            Err(e) => {
                self.count_failure(&subscription.webhook_id, event);
                DeliveryOutcome::Failed(e)
            }
        }
    }

    /// Fan one event out to every subscription active at call time.
    /// Deliveries run concurrently with no ordering guarantees; one
    /// subscriber's failure never blocks or fails the others. Returns the
    /// number of successful deliveries.
    pub async fn notify_all(
        &self,
        agent_id: &str,
        event: &str,
        data: &serde_json::Value,
    ) -> usize {
        let subscriptions = match self.store.active_for_agent(agent_id) {
            Ok(subs) => subs,
            Err(e) => {
                warn!(agent_id, event, error = %e, "could not load subscriptions for fan-out");
                return 0;
            }
        };

        if subscriptions.is_empty() {
            return 0;
        }

        let outcomes = futures_util::future::join_all(
            subscriptions
                .iter()
                .map(|sub| self.notify(sub, event, data)),
        )
        .await;

        let delivered = outcomes.iter().filter(|o| o.is_delivered()).count();
        debug!(
            agent_id,
            event,
            delivered,
            attempted = subscriptions.len(),
            "webhook fan-out complete"
        );
        delivered
    }

    fn count_failure(&self, webhook_id: &str, event: &str) {
        warn!(webhook_id, event, "webhook delivery failed");
        if let Err(e) = self.store.record_failure(webhook_id, self.failure_limit) {
            warn!(webhook_id, error = %e, "failed to record delivery failure");
        }
    }
}

/// Lowercase hex HMAC-SHA256 over the exact bytes sent on the wire.
fn sign(secret: &str, body: &[u8]) -> Result<String, DeliveryError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| DeliveryError::Payload(e.to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// 32 bytes of OS entropy, hex encoded.
fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
