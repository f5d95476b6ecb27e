//! Push events streamed from the hub to connected sessions.
//!
//! Wire form is an envelope `{"event": "<name>", "payload": <body>}` carried
//! in a WebSocket text frame.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::notification::Notification;

pub const EVENT_NEW: &str = "notification:new";
pub const EVENT_UPDATE: &str = "notification:update";
pub const EVENT_DELETE: &str = "notification:delete";

/// Payload of `notification:delete`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct DeletedNotification {
    pub id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "payload")]
pub enum PushEvent {
    #[serde(rename = "notification:new")]
    New(Notification),
    #[serde(rename = "notification:update")]
    Update(Notification),
    #[serde(rename = "notification:delete")]
    Delete(DeletedNotification),
}

impl PushEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::New(_) => EVENT_NEW,
            PushEvent::Update(_) => EVENT_UPDATE,
            PushEvent::Delete(_) => EVENT_DELETE,
        }
    }

    /// Rebuild a typed event from a name and a raw payload, as delivered by
    /// the transport's per-event listeners.
    pub fn from_parts(event: &str, payload: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({ "event": event, "payload": payload }))
    }
}

/// Untyped envelope, used by the transport which only routes by name.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notification::{NewNotification, NotificationType, Priority};

    fn sample() -> Notification {
        Notification::from_new(NewNotification {
            user_id: Uuid::new_v4(),
            r#type: NotificationType::ChatMessage,
            priority: Priority::Important,
            title: "Message from editor".into(),
            message: "Cut v2 is ready".into(),
            link: None,
            metadata: None,
        })
    }

    #[test]
    fn test_delete_envelope_shape() {
        let id = Uuid::new_v4();
        let v = serde_json::to_value(PushEvent::Delete(DeletedNotification { id })).unwrap();
        assert_eq!(v["event"], EVENT_DELETE);
        assert_eq!(v["payload"]["id"], id.to_string());
    }

    #[test]
    fn test_from_parts_matches_name() {
        let n = sample();
        let payload = serde_json::to_value(&n).unwrap();
        let event = PushEvent::from_parts(EVENT_UPDATE, payload).unwrap();
        assert_eq!(event.name(), EVENT_UPDATE);
        assert_eq!(event, PushEvent::Update(n));
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(PushEvent::from_parts("notification:explode", serde_json::json!({})).is_err());
    }

    #[test]
    fn test_envelope_reads_typed_event() {
        let text = serde_json::to_string(&PushEvent::New(sample())).unwrap();
        let env: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(env.event, EVENT_NEW);
        assert!(env.payload.get("title").is_some());
    }
}
