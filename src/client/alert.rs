use crate::models::notification::Notification;

/// Receives transient alerts for pushed notifications above `info` priority.
pub trait AlertSink: Send + Sync {
    fn alert(&self, notification: &Notification);
}

/// Default sink: emits the alert as a structured log line.
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, notification: &Notification) {
        tracing::info!(
            id = %notification.id,
            priority = %notification.priority,
            event_type = %notification.r#type,
            title = %notification.title,
            "notification alert"
        );
    }
}
