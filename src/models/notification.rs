use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub r#type: NotificationType, // 'type' is a reserved keyword
    pub priority: Priority,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Materialize a producer payload into a stored row.
    pub fn from_new(new: NewNotification) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            r#type: new.r#type,
            priority: new.priority,
            title: new.title,
            message: new.message,
            link: new.link,
            metadata: new.metadata,
            read: false,
            read_at: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the feed should raise a transient alert for this notification.
    pub fn wants_alert(&self) -> bool {
        self.priority != Priority::Info
    }
}

/// Producer-side payload: what a deadline job or an admin sends to the hub.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub r#type: NotificationType,
    #[serde(default)]
    pub priority: Priority,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Event names a notification can carry. The snake_case form doubles as the
/// preference key.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum NotificationType {
    DeadlineApproaching,
    DeadlineMissed,
    ProjectAssigned,
    ProjectStatusChanged,
    ChatMessage,
    FileUploaded,
    RevisionRequested,
    InvoiceCreated,
    InvoicePaid,
    PaymentReceived,
    System,
}

impl NotificationType {
    pub const ALL: [NotificationType; 11] = [
        NotificationType::DeadlineApproaching,
        NotificationType::DeadlineMissed,
        NotificationType::ProjectAssigned,
        NotificationType::ProjectStatusChanged,
        NotificationType::ChatMessage,
        NotificationType::FileUploaded,
        NotificationType::RevisionRequested,
        NotificationType::InvoiceCreated,
        NotificationType::InvoicePaid,
        NotificationType::PaymentReceived,
        NotificationType::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::DeadlineApproaching => "deadline_approaching",
            NotificationType::DeadlineMissed => "deadline_missed",
            NotificationType::ProjectAssigned => "project_assigned",
            NotificationType::ProjectStatusChanged => "project_status_changed",
            NotificationType::ChatMessage => "chat_message",
            NotificationType::FileUploaded => "file_uploaded",
            NotificationType::RevisionRequested => "revision_requested",
            NotificationType::InvoiceCreated => "invoice_created",
            NotificationType::InvoicePaid => "invoice_paid",
            NotificationType::PaymentReceived => "payment_received",
            NotificationType::System => "system",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown notification type: {}", s))
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Info,
    Important,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Info => "info",
            Priority::Important => "important",
            Priority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Priority::Info),
            "important" => Ok(Priority::Important),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}
