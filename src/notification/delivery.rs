//! Preference-gated delivery of a producer's notification.
//!
//! Flow for one `NewNotification`:
//! 1. Load the recipient's preferences (created lazily).
//! 2. In-app enabled → store the row and push `notification:new`.
//! 3. E-mail enabled and an e-mail function configured → dispatch in the background.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::email::{EmailDispatcher, EmailEvent};
use crate::metrics;
use crate::models::event::PushEvent;
use crate::models::notification::{NewNotification, Notification};
use crate::models::preference::Channel;
use crate::push::PushHub;
use crate::store::NotificationStore;

/// What happened to a notification handed to the deliverer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    /// The stored row, absent when in-app delivery is disabled.
    pub notification: Option<Notification>,
    pub in_app: bool,
    pub email: bool,
    /// Live sessions the `notification:new` event reached.
    pub pushed_sessions: usize,
}

#[derive(Clone)]
pub struct Deliverer {
    store: Arc<dyn NotificationStore>,
    hub: PushHub,
    email: EmailDispatcher,
}

impl Deliverer {
    pub fn new(store: Arc<dyn NotificationStore>, hub: PushHub, email: EmailDispatcher) -> Self {
        Self { store, hub, email }
    }

    pub async fn deliver(&self, new: NewNotification) -> anyhow::Result<DeliveryOutcome> {
        let prefs = self.store.get_preferences(new.user_id).await?;
        let kind = new.r#type;
        let user_id = new.user_id;
        let wants_in_app = prefs.allows(Channel::InApp, kind);
        let wants_email = prefs.allows(Channel::Email, kind) && self.email.is_enabled();

        let mut outcome = DeliveryOutcome {
            notification: None,
            in_app: false,
            email: false,
            pushed_sessions: 0,
        };

        if wants_in_app {
            let row = self.store.create_notification(new).await?;
            metrics::notification_created(row.r#type.as_str(), row.priority.as_str());
            outcome.pushed_sessions = self.hub.publish(user_id, PushEvent::New(row.clone()));
            outcome.in_app = true;

            if wants_email {
                self.email.dispatch(EmailEvent::from_notification(&row));
                outcome.email = true;
            }
            outcome.notification = Some(row);
        } else {
            metrics::notification_suppressed(kind.as_str(), Channel::InApp.as_str());
            if wants_email {
                // Not stored, but the e-mail still needs a stable id to dedupe on.
                let transient = Notification::from_new(new);
                self.email.dispatch(EmailEvent::from_notification(&transient));
                outcome.email = true;
            }
        }

        if !prefs.allows(Channel::Email, kind) {
            metrics::notification_suppressed(kind.as_str(), Channel::Email.as_str());
        }

        info!(
            user_id = %user_id,
            event_type = %kind,
            in_app = outcome.in_app,
            email = outcome.email,
            sessions = outcome.pushed_sessions,
            "notification delivered"
        );
        Ok(outcome)
    }
}
