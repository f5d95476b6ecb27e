//! notify-hub: notification delivery for the production dashboard.
//!
//! The server half stores notifications, gates them on user preferences and
//! pushes changes to live sessions. The client half (`client`) keeps a
//! per-user notification feed in sync over REST and the push socket.

use std::sync::Arc;

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod notification;
pub mod push;
pub mod store;

use config::Config;
use notification::delivery::Deliverer;
use notification::email::EmailDispatcher;
use push::PushHub;
use store::NotificationStore;

/// Shared state handed to every request handler.
pub struct AppState {
    pub store: Arc<dyn NotificationStore>,
    pub hub: PushHub,
    pub deliverer: Deliverer,
    pub config: Config,
}

impl AppState {
    pub fn new(store: Arc<dyn NotificationStore>, email: EmailDispatcher, config: Config) -> Self {
        let hub = PushHub::new();
        let deliverer = Deliverer::new(store.clone(), hub.clone(), email);
        Self {
            store,
            hub,
            deliverer,
            config,
        }
    }
}
