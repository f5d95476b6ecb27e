use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::NotificationStore;
use crate::models::notification::{NewNotification, Notification};
use crate::models::preference::{Channel, NotificationPreferences};

/// In-process store keyed by notification id.
///
/// Used when no `DATABASE_URL` is configured and by the test suites. Not
/// durable: everything is lost on restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    notifications: Arc<DashMap<Uuid, Notification>>,
    preferences: Arc<DashMap<Uuid, NotificationPreferences>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed row, keeping its timestamps. Test helper for
    /// seeding ordered data and aged read rows.
    pub fn insert(&self, notification: Notification) {
        self.notifications.insert(notification.id, notification);
    }

    fn owned_by(&self, user_id: Uuid) -> Vec<Notification> {
        self.notifications
            .iter()
            .filter(|e| e.value().user_id == user_id)
            .map(|e| e.value().clone())
            .collect()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create_notification(&self, new: NewNotification) -> anyhow::Result<Notification> {
        let row = Notification::from_new(new);
        self.notifications.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Notification>> {
        let mut rows = self.owned_by(user_id);
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_unread_notifications(&self, user_id: Uuid) -> anyhow::Result<i64> {
        Ok(self
            .notifications
            .iter()
            .filter(|e| e.value().user_id == user_id && !e.value().read)
            .count() as i64)
    }

    async fn mark_notification_read(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Notification>> {
        match self.notifications.get_mut(&id) {
            Some(mut n) if n.user_id == user_id => {
                if !n.read {
                    n.read = true;
                    n.read_at = Some(Utc::now());
                }
                Ok(Some(n.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> anyhow::Result<u64> {
        let now = Utc::now();
        let mut flipped = 0;
        for mut entry in self.notifications.iter_mut() {
            let n = entry.value_mut();
            if n.user_id == user_id && !n.read {
                n.read = true;
                n.read_at = Some(now);
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn delete_notification(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        Ok(self
            .notifications
            .remove_if(&id, |_, n| n.user_id == user_id)
            .is_some())
    }

    async fn delete_all_notifications(&self, user_id: Uuid) -> anyhow::Result<u64> {
        let before = self.notifications.len();
        self.notifications.retain(|_, n| n.user_id != user_id);
        Ok(before.saturating_sub(self.notifications.len()) as u64)
    }

    async fn purge_read_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let before = self.notifications.len();
        self.notifications
            .retain(|_, n| !(n.read && n.read_at.map_or(false, |at| at < cutoff)));
        Ok(before.saturating_sub(self.notifications.len()) as u64)
    }

    async fn get_preferences(&self, user_id: Uuid) -> anyhow::Result<NotificationPreferences> {
        Ok(self
            .preferences
            .entry(user_id)
            .or_insert_with(|| NotificationPreferences::new(user_id))
            .clone())
    }

    async fn set_preference(
        &self,
        user_id: Uuid,
        channel: Channel,
        key: &str,
        enabled: bool,
    ) -> anyhow::Result<NotificationPreferences> {
        let mut entry = self
            .preferences
            .entry(user_id)
            .or_insert_with(|| NotificationPreferences::new(user_id));
        entry.set(channel, key, enabled);
        Ok(entry.clone())
    }
}
