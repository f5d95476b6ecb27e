//! Per-user fan-out of push events to connected WebSocket sessions.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::metrics;
use crate::models::event::PushEvent;

/// Events buffered per user before slow sessions start lagging.
const CHANNEL_CAPACITY: usize = 256;

/// Shared push hub. Cloning is cheap; all clones publish into the same
/// channels.
#[derive(Clone, Default)]
pub struct PushHub {
    channels: Arc<DashMap<Uuid, broadcast::Sender<PushEvent>>>,
}

impl PushHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a user's events. Sessions of the same user share one
    /// channel.
    pub fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<PushEvent> {
        self.channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event to every live session of `user_id`.
    /// Returns how many sessions received it.
    pub fn publish(&self, user_id: Uuid, event: PushEvent) -> usize {
        let name = event.name();
        let delivered = match self.channels.get(&user_id) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        };

        metrics::push_published(name, delivered);
        tracing::debug!(user_id = %user_id, event = name, sessions = delivered, "push event published");

        if delivered == 0 {
            // Nobody listening: drop the idle channel so the map does not grow
            // with every user that ever received a notification.
            self.channels
                .remove_if(&user_id, |_, tx| tx.receiver_count() == 0);
        }
        delivered
    }

    /// Drop the user's channel once no session holds a receiver. Sessions
    /// call this on close, after dropping their own receiver.
    pub fn release(&self, user_id: Uuid) -> bool {
        self.channels
            .remove_if(&user_id, |_, tx| tx.receiver_count() == 0)
            .is_some()
    }

    /// Number of users with at least one channel allocated.
    pub fn active_users(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::DeletedNotification;

    #[tokio::test]
    async fn test_publish_reaches_every_session_of_user() {
        let hub = PushHub::new();
        let user = Uuid::new_v4();
        let mut a = hub.subscribe(user);
        let mut b = hub.subscribe(user);

        let event = PushEvent::Delete(DeletedNotification { id: Uuid::new_v4() });
        assert_eq!(hub.publish(user, event.clone()), 2);
        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_publish_is_scoped_to_user() {
        let hub = PushHub::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut bob_rx = hub.subscribe(bob);

        let event = PushEvent::Delete(DeletedNotification { id: Uuid::new_v4() });
        assert_eq!(hub.publish(alice, event), 0);
        assert!(bob_rx.try_recv().is_err());
    }

    #[test]
    fn test_idle_channel_is_dropped() {
        let hub = PushHub::new();
        let user = Uuid::new_v4();
        drop(hub.subscribe(user));
        assert_eq!(hub.active_users(), 1);

        hub.publish(user, PushEvent::Delete(DeletedNotification { id: Uuid::new_v4() }));
        assert_eq!(hub.active_users(), 0);
    }

    #[test]
    fn test_release_waits_for_last_session() {
        let hub = PushHub::new();
        let user = Uuid::new_v4();
        let first = hub.subscribe(user);
        let second = hub.subscribe(user);

        drop(first);
        assert!(!hub.release(user));
        assert_eq!(hub.active_users(), 1);

        drop(second);
        assert!(hub.release(user));
        assert_eq!(hub.active_users(), 0);
        assert!(!hub.release(user));
    }
}
