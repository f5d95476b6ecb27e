//! Persistence for notification and preference rows.
//!
//! Every query is scoped by the owning user: a notification id that belongs
//! to somebody else behaves exactly like a missing one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::notification::{NewNotification, Notification};
use crate::models::preference::{Channel, NotificationPreferences};

pub mod memory;
pub mod postgres;

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(&self, new: NewNotification) -> anyhow::Result<Notification>;

    /// Newest first.
    async fn list_notifications(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Notification>>;

    async fn count_unread_notifications(&self, user_id: Uuid) -> anyhow::Result<i64>;

    /// Returns the updated row, or `None` when the id is unknown for this user.
    async fn mark_notification_read(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Notification>>;

    /// Returns how many rows flipped.
    async fn mark_all_notifications_read(&self, user_id: Uuid) -> anyhow::Result<u64>;

    async fn delete_notification(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<bool>;

    /// Returns how many rows were removed.
    async fn delete_all_notifications(&self, user_id: Uuid) -> anyhow::Result<u64>;

    /// Delete read notifications whose `read_at` is older than `cutoff`.
    async fn purge_read_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64>;

    /// Fetch a user's preferences, creating the default record if missing.
    async fn get_preferences(&self, user_id: Uuid) -> anyhow::Result<NotificationPreferences>;

    async fn set_preference(
        &self,
        user_id: Uuid,
        channel: Channel,
        key: &str,
        enabled: bool,
    ) -> anyhow::Result<NotificationPreferences>;
}

/// Clamp REST pagination input to what the stores accept.
pub fn page_bounds(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;
