use anyhow::Result;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics;
use crate::models::notification::Notification;

// ── E-mail Event ──────────────────────────────────────────────

/// Body posted to the e-mail function. Recipient lookup and templating are
/// the function's job; the hub only says who and what.
#[derive(Debug, Clone, Serialize)]
pub struct EmailEvent {
    pub notification_id: Uuid,
    pub user_id: Uuid,
    /// Event type key, e.g. "deadline_approaching".
    pub r#type: String,
    pub priority: String,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    /// ISO-8601 timestamp of when the event was dispatched.
    pub timestamp: String,
}

impl EmailEvent {
    pub fn from_notification(n: &Notification) -> Self {
        Self {
            notification_id: n.id,
            user_id: n.user_id,
            r#type: n.r#type.as_str().to_string(),
            priority: n.priority.as_str().to_string(),
            title: n.title.clone(),
            message: n.message.clone(),
            link: n.link.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns lowercase hex digest (e.g. "sha256=<hex>").
pub(crate) fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    let result = mac.finalize();
    let bytes = result.into_bytes();
    format!("sha256={}", hex::encode(bytes))
}

// ── E-mail Dispatcher ─────────────────────────────────────────

/// Calls the e-mail function for notifications whose e-mail preference is on.
/// Supports:
/// - HMAC-SHA256 signing (x-notify-signature header)
/// - Up to 3 retries with back-off (1s → 5s → 25s)
#[derive(Clone)]
pub struct EmailDispatcher {
    client: reqwest::Client,
    endpoint: Option<String>,
    signing_secret: Option<String>,
    backoff: Vec<Duration>,
}

impl EmailDispatcher {
    pub fn new(endpoint: Option<String>, signing_secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("NotifyHub-Email/1.0")
                .build()
                .expect("failed to build e-mail HTTP client"),
            endpoint,
            signing_secret,
            backoff: vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(25),
            ],
        }
    }

    /// No endpoint: every dispatch is a no-op.
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// Override the retry schedule. The first entry is the delay before the
    /// first attempt.
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Send one event with retry. Returns `Ok(())` if any attempt succeeded.
    pub async fn send(&self, event: &EmailEvent) -> Result<()> {
        let url = match &self.endpoint {
            Some(u) => u.as_str(),
            None => {
                debug!("No e-mail function URL configured, skipping e-mail");
                return Ok(());
            }
        };

        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("e-mail serialize error: {}", e))?;
        let delivery_id = Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self
            .signing_secret
            .as_deref()
            .map(|s| hmac_sha256_hex(s, &payload));

        for (attempt, &delay) in self.backoff.iter().enumerate() {
            if !delay.is_zero() {
                debug!(
                    url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    event_type = %event.r#type,
                    "retrying e-mail dispatch"
                );
                tokio::time::sleep(delay).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-notify-delivery-id", &delivery_id)
                .header("x-notify-timestamp", &timestamp)
                .header("x-notify-event", &event.r#type);

            if let Some(ref sig) = signature {
                req = req.header("x-notify-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        event_type = %event.r#type,
                        notification_id = %event.notification_id,
                        delivery_id = %delivery_id,
                        attempt,
                        "e-mail dispatched"
                    );
                    metrics::email_dispatched(true);
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        url,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %status,
                        body = %body,
                        "e-mail function returned non-2xx"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "e-mail function request error"
                    );
                }
            }
        }

        metrics::email_dispatched(false);
        warn!(
            url,
            notification_id = %event.notification_id,
            delivery_id = %delivery_id,
            "e-mail dispatch failed after all retries"
        );
        Err(anyhow::anyhow!(
            "e-mail dispatch failed after {} attempts: {}",
            self.backoff.len(),
            url
        ))
    }

    /// Fire-and-forget dispatch; failures are logged by `send`.
    pub fn dispatch(&self, event: EmailEvent) -> Option<tokio::task::JoinHandle<()>> {
        if !self.is_enabled() {
            return None;
        }
        let dispatcher = self.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = dispatcher.send(&event).await {
                warn!(error = %e, "e-mail dispatch ultimately failed");
            }
        }))
    }
}

// ── Tests ─────────────────────────────────────────────────────
