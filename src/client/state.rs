//! Feed state and the reducer every change goes through.
//!
//! Local mutations (after the server confirmed them) and push events are both
//! expressed as a [`FeedAction`]. Applying an action never performs I/O; the
//! returned [`Reduction`] tells the caller which side effects to run.

use uuid::Uuid;

use crate::models::event::PushEvent;
use crate::models::notification::Notification;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedState {
    /// Newest first.
    pub notifications: Vec<Notification>,
    pub unread_count: u64,
    pub loading: bool,
    /// Bumped by every change that can make an in-flight recount stale.
    pub unread_generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedAction {
    /// A page fetch started.
    Loading,
    /// A page fetch finished; replaces the list.
    Loaded(Vec<Notification>),
    /// A page fetch failed; only clears the loading flag.
    LoadFailed,
    MarkedRead(Uuid),
    MarkedAllRead,
    Removed(Uuid),
    Cleared,
    /// Server unread count, fetched while the state was at `generation`.
    UnreadCountRefreshed { count: u64, generation: u64 },
    Push(PushEvent),
}

/// Side effects requested by an applied action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reduction {
    /// Notification to raise a transient alert for.
    pub alert: Option<Notification>,
    /// The counter must be re-derived from the server.
    pub refresh_unread: bool,
}

impl Reduction {
    fn refresh() -> Self {
        Self {
            alert: None,
            refresh_unread: true,
        }
    }
}

impl FeedState {
    /// Unread items in the loaded page.
    pub fn local_unread(&self) -> u64 {
        self.notifications.iter().filter(|n| !n.read).count() as u64
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.notifications.iter().position(|n| n.id == id)
    }

    pub fn apply(&mut self, action: FeedAction) -> Reduction {
        if !matches!(
            action,
            FeedAction::Loading | FeedAction::LoadFailed | FeedAction::UnreadCountRefreshed { .. }
        ) {
            self.unread_generation += 1;
        }
        match action {
            FeedAction::Loading => {
                self.loading = true;
                Reduction::default()
            }
            FeedAction::Loaded(page) => {
                self.notifications = page;
                // Derived from the page itself, not a separate count call.
                self.unread_count = self.local_unread();
                self.loading = false;
                Reduction::default()
            }
            FeedAction::LoadFailed => {
                self.loading = false;
                Reduction::default()
            }
            FeedAction::MarkedRead(id) => {
                if let Some(item) = self.notifications.iter_mut().find(|n| n.id == id) {
                    if !item.read {
                        item.read = true;
                        self.unread_count = self.unread_count.saturating_sub(1);
                    }
                }
                Reduction::default()
            }
            FeedAction::MarkedAllRead => {
                for item in &mut self.notifications {
                    item.read = true;
                }
                self.unread_count = 0;
                Reduction::default()
            }
            FeedAction::Removed(id) => {
                self.notifications.retain(|n| n.id != id);
                Reduction::refresh()
            }
            FeedAction::Cleared => {
                self.notifications.clear();
                self.unread_count = 0;
                Reduction::default()
            }
            FeedAction::UnreadCountRefreshed { count, generation } => {
                if generation != self.unread_generation {
                    // Something changed while the count was in flight.
                    return Reduction::refresh();
                }
                self.unread_count = count;
                self.unread_generation += 1;
                Reduction::default()
            }
            FeedAction::Push(event) => self.apply_push(event),
        }
    }

    fn apply_push(&mut self, event: PushEvent) -> Reduction {
        match event {
            PushEvent::New(notification) => {
                // Redelivery of an event already applied.
                if self.position(notification.id).is_some() {
                    return Reduction::default();
                }
                if !notification.read {
                    self.unread_count += 1;
                }
                let alert = notification.wants_alert().then(|| notification.clone());
                self.notifications.insert(0, notification);
                Reduction {
                    alert,
                    refresh_unread: false,
                }
            }
            PushEvent::Update(notification) => {
                if let Some(idx) = self.position(notification.id) {
                    self.notifications[idx] = notification;
                }
                Reduction::refresh()
            }
            PushEvent::Delete(deleted) => {
                self.notifications.retain(|n| n.id != deleted.id);
                Reduction::refresh()
            }
        }
    }
}
