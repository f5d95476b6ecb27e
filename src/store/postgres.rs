use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::NotificationStore;
use crate::models::notification::{NewNotification, Notification};
use crate::models::preference::{Channel, NotificationPreferences};

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, type, priority, title, message, link, metadata, read, read_at, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct PreferenceRow {
    user_id: Uuid,
    email_notifications: Json<HashMap<String, bool>>,
    in_app_notifications: Json<HashMap<String, bool>>,
}

impl From<PreferenceRow> for NotificationPreferences {
    fn from(row: PreferenceRow) -> Self {
        Self {
            user_id: row.user_id,
            email_notifications: row.email_notifications.0,
            in_app_notifications: row.in_app_notifications.0,
        }
    }
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn create_notification(&self, new: NewNotification) -> anyhow::Result<Notification> {
        let row = sqlx::query_as::<_, Notification>(&format!(
            r#"INSERT INTO notifications (user_id, type, priority, title, message, link, metadata)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING {}"#,
            NOTIFICATION_COLUMNS
        ))
        .bind(new.user_id)
        .bind(new.r#type)
        .bind(new.priority)
        .bind(&new.title)
        .bind(&new.message)
        .bind(&new.link)
        .bind(&new.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(&format!(
            r#"SELECT {}
               FROM notifications
               WHERE user_id = $1
               ORDER BY created_at DESC, id DESC
               LIMIT $2 OFFSET $3"#,
            NOTIFICATION_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_unread_notifications(&self, user_id: Uuid) -> anyhow::Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND read = false"#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn mark_notification_read(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Notification>> {
        let row = sqlx::query_as::<_, Notification>(&format!(
            r#"UPDATE notifications
               SET read = true, read_at = COALESCE(read_at, NOW())
               WHERE id = $1 AND user_id = $2
               RETURNING {}"#,
            NOTIFICATION_COLUMNS
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"UPDATE notifications SET read = true, read_at = NOW() WHERE user_id = $1 AND read = false"#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_notification(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(r#"DELETE FROM notifications WHERE id = $1 AND user_id = $2"#)
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all_notifications(&self, user_id: Uuid) -> anyhow::Result<u64> {
        let result = sqlx::query(r#"DELETE FROM notifications WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_read_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM notifications WHERE read = true AND read_at < $1"#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_preferences(&self, user_id: Uuid) -> anyhow::Result<NotificationPreferences> {
        // Lazily create the default record; a concurrent first read is a no-op.
        sqlx::query(
            r#"INSERT INTO notification_preferences (user_id) VALUES ($1)
               ON CONFLICT (user_id) DO NOTHING"#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, PreferenceRow>(
            r#"SELECT user_id, email_notifications, in_app_notifications
               FROM notification_preferences WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn set_preference(
        &self,
        user_id: Uuid,
        channel: Channel,
        key: &str,
        enabled: bool,
    ) -> anyhow::Result<NotificationPreferences> {
        let sql = match channel {
            Channel::Email => {
                r#"INSERT INTO notification_preferences (user_id, email_notifications)
                   VALUES ($1, jsonb_build_object($2::text, $3::boolean))
                   ON CONFLICT (user_id) DO UPDATE
                       SET email_notifications = notification_preferences.email_notifications
                               || jsonb_build_object($2::text, $3::boolean),
                           updated_at = NOW()
                   RETURNING user_id, email_notifications, in_app_notifications"#
            }
            Channel::InApp => {
                r#"INSERT INTO notification_preferences (user_id, in_app_notifications)
                   VALUES ($1, jsonb_build_object($2::text, $3::boolean))
                   ON CONFLICT (user_id) DO UPDATE
                       SET in_app_notifications = notification_preferences.in_app_notifications
                               || jsonb_build_object($2::text, $3::boolean),
                           updated_at = NOW()
                   RETURNING user_id, email_notifications, in_app_notifications"#
            }
        };

        let row = sqlx::query_as::<_, PreferenceRow>(sql)
            .bind(user_id)
            .bind(key)
            .bind(enabled)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }
}
