//! REST access layer for the hub's notification endpoints.
//! Uses reqwest-middleware so transient failures (connect errors, 5xx, 429)
//! are retried with exponential backoff before they reach the feed.
use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::ClientError;
use crate::models::notification::{NewNotification, Notification};
use crate::models::preference::{Channel, NotificationPreferences};
use crate::notification::delivery::DeliveryOutcome;

/// Calls the feed makes against the hub.
#[async_trait]
pub trait NotificationAccess: Send + Sync {
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Notification>, ClientError>;
    async fn unread_count(&self) -> Result<u64, ClientError>;
    async fn mark_read(&self, id: Uuid) -> Result<bool, ClientError>;
    async fn mark_all_read(&self) -> Result<bool, ClientError>;
    async fn delete(&self, id: Uuid) -> Result<bool, ClientError>;
    async fn delete_all(&self) -> Result<bool, ClientError>;
}

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Deserialize)]
struct SuccessResponse {
    success: bool,
}

pub struct HttpNotificationAccess {
    client: ClientWithMiddleware,
    base: String,
    token: String,
}

impl HttpNotificationAccess {
    /// `api_url` is the hub origin, e.g. `http://localhost:8080`.
    pub fn new(api_url: &str, token: impl Into<String>) -> Self {
        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self {
            client,
            base: format!("{}/api/v1", api_url.trim_end_matches('/')),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        if self.token.is_empty() {
            req
        } else {
            req.header("authorization", format!("Bearer {}", self.token))
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ClientError> {
        let resp = self.authed(req).send().await.map_err(|e| {
            tracing::warn!("hub request failed after retries: {}", e);
            ClientError::from(e)
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }
        Ok(resp.json::<T>().await?)
    }

    pub async fn get_preferences(&self) -> Result<NotificationPreferences, ClientError> {
        self.send(self.client.get(self.url("/preferences"))).await
    }

    pub async fn set_preference(
        &self,
        channel: Channel,
        key: &str,
        enabled: bool,
    ) -> Result<NotificationPreferences, ClientError> {
        let req = self
            .client
            .put(self.url(&format!("/preferences/{}/{}", channel, key)))
            .json(&serde_json::json!({ "enabled": enabled }));
        self.send(req).await
    }

    /// Producer call: create and deliver a notification with the admin key.
    pub async fn create_notification(
        &self,
        admin_key: &str,
        new: &NewNotification,
    ) -> Result<DeliveryOutcome, ClientError> {
        let req = self
            .client
            .post(self.url("/admin/notifications"))
            .header("x-admin-key", admin_key)
            .json(new);
        self.send(req).await
    }
}

#[async_trait]
impl NotificationAccess for HttpNotificationAccess {
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Notification>, ClientError> {
        let url = self.url(&format!("/notifications?limit={}&offset={}", limit, offset));
        self.send(self.client.get(url)).await
    }

    async fn unread_count(&self) -> Result<u64, ClientError> {
        let resp: CountResponse = self
            .send(self.client.get(self.url("/notifications/unread")))
            .await?;
        Ok(resp.count)
    }

    async fn mark_read(&self, id: Uuid) -> Result<bool, ClientError> {
        let resp: SuccessResponse = self
            .send(self.client.post(self.url(&format!("/notifications/{}/read", id))))
            .await?;
        Ok(resp.success)
    }

    async fn mark_all_read(&self) -> Result<bool, ClientError> {
        let resp: SuccessResponse = self
            .send(self.client.post(self.url("/notifications/read-all")))
            .await?;
        Ok(resp.success)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, ClientError> {
        let resp: SuccessResponse = self
            .send(self.client.delete(self.url(&format!("/notifications/{}", id))))
            .await?;
        Ok(resp.success)
    }

    async fn delete_all(&self) -> Result<bool, ClientError> {
        let resp: SuccessResponse = self
            .send(self.client.delete(self.url("/notifications")))
            .await?;
        Ok(resp.success)
    }
}
