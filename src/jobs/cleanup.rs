//! Background job: purge read notifications past the retention window.
//!
//! Runs hourly. Unread notifications are never purged regardless of age.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time;

use crate::store::NotificationStore;

/// Spawn the background cleanup task. Call this once at startup.
/// Returns `None` when retention is disabled (`retention_days == 0`).
pub fn spawn(store: Arc<dyn NotificationStore>, retention_days: u32) -> Option<JoinHandle<()>> {
    if retention_days == 0 {
        tracing::info!("notification retention disabled, cleanup job not started");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(3600)); // every hour
        loop {
            interval.tick().await;
            if let Err(e) = purge_expired(store.as_ref(), retention_days).await {
                tracing::error!("cleanup job failed: {}", e);
            }
        }
    }))
}

/// Delete read notifications whose `read_at` is older than `retention_days`.
pub async fn purge_expired(store: &dyn NotificationStore, retention_days: u32) -> anyhow::Result<u64> {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
    let purged = store.purge_read_before(cutoff).await?;

    if purged > 0 {
        tracing::info!(rows = purged, retention_days, "purged expired read notifications");
    }

    Ok(purged)
}
