use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::notification::NotificationType;

/// Delivery channel a preference flag applies to.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    InApp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::InApp => "in_app",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "in_app" | "in-app" | "inapp" => Ok(Channel::InApp),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// Per-user notification preferences.
///
/// Keys are event-type names (`deadline_approaching`, `chat_message`, ...).
/// A missing key means the channel is enabled for that event type, so a
/// freshly created record with empty maps lets everything through.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NotificationPreferences {
    pub user_id: Uuid,
    #[serde(default)]
    pub email_notifications: HashMap<String, bool>,
    #[serde(default)]
    pub in_app_notifications: HashMap<String, bool>,
}

impl NotificationPreferences {
    /// The record created on first read for a user without one.
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            email_notifications: HashMap::new(),
            in_app_notifications: HashMap::new(),
        }
    }

    fn map(&self, channel: Channel) -> &HashMap<String, bool> {
        match channel {
            Channel::Email => &self.email_notifications,
            Channel::InApp => &self.in_app_notifications,
        }
    }

    fn map_mut(&mut self, channel: Channel) -> &mut HashMap<String, bool> {
        match channel {
            Channel::Email => &mut self.email_notifications,
            Channel::InApp => &mut self.in_app_notifications,
        }
    }

    pub fn is_enabled(&self, channel: Channel, key: &str) -> bool {
        self.map(channel).get(key).copied().unwrap_or(true)
    }

    /// Gate check used before dispatching a notification on `channel`.
    pub fn allows(&self, channel: Channel, kind: NotificationType) -> bool {
        self.is_enabled(channel, kind.as_str())
    }

    pub fn set(&mut self, channel: Channel, key: &str, enabled: bool) {
        self.map_mut(channel).insert(key.to_string(), enabled);
    }

    /// Flip one key and return its new value.
    pub fn toggle(&mut self, channel: Channel, key: &str) -> bool {
        let next = !self.is_enabled(channel, key);
        self.set(channel, key, next);
        next
    }
}
