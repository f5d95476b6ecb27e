//! Notification feed: the per-view controller that keeps a page of
//! notifications and the unread counter in sync with the hub.
//!
//! Lifecycle:
//! 1. `mount` (unauthenticated) → empty, idle feed; no requests, no transport.
//! 2. `mount` (authenticated) → fetch the first page, register push listeners,
//!    schedule the transport connect after `connect_delay`.
//! 3. Mutations call the hub first and apply locally only once it confirms.
//! 4. `unmount` (or drop) → listeners removed, connect timer and pump stopped.
//!
//! Every change goes through [`FeedState::apply`] inside one
//! `watch::Sender::send_modify`, so subscribers never observe the list and
//! counter out of step.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::access::NotificationAccess;
use super::alert::AlertSink;
use super::state::{FeedAction, FeedState, Reduction};
use super::transport::{ListenerId, RealtimeClient};
use crate::errors::ClientError;
use crate::models::event::{PushEvent, EVENT_DELETE, EVENT_NEW, EVENT_UPDATE};

/// Recounts attempted before a refresh gives up.
const MAX_RECOUNT_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Notifications fetched on mount and on `refresh`.
    pub page_size: i64,
    /// Wait before opening the transport, letting auth state settle.
    pub connect_delay: Duration,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            page_size: 50,
            connect_delay: Duration::from_secs(1),
        }
    }
}

/// Collaborators the feed is composed from. All are shared with the rest of
/// the application.
#[derive(Clone)]
pub struct FeedDeps {
    pub access: Arc<dyn NotificationAccess>,
    pub transport: Arc<RealtimeClient>,
    pub alerts: Arc<dyn AlertSink>,
}

struct Inner {
    access: Arc<dyn NotificationAccess>,
    alerts: Arc<dyn AlertSink>,
    state: watch::Sender<FeedState>,
    page_size: i64,
}

impl Inner {
    async fn dispatch(&self, action: FeedAction) {
        let mut reduction = Reduction::default();
        self.state.send_modify(|s| reduction = s.apply(action));

        if let Some(notification) = reduction.alert {
            self.alerts.alert(&notification);
        }
        if reduction.refresh_unread {
            self.refresh_unread_count().await;
        }
    }

    async fn load(&self) -> bool {
        self.state.send_modify(|s| {
            s.apply(FeedAction::Loading);
        });
        match self.access.list(self.page_size, 0).await {
            Ok(page) => {
                tracing::debug!(count = page.len(), "feed: page loaded");
                self.dispatch(FeedAction::Loaded(page)).await;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "feed: failed to load notifications");
                self.dispatch(FeedAction::LoadFailed).await;
                false
            }
        }
    }

    /// Fetch the server count and apply it, re-fetching while local changes
    /// keep overtaking the response.
    async fn refresh_unread_count(&self) -> bool {
        for _ in 0..MAX_RECOUNT_ATTEMPTS {
            let generation = self.state.borrow().unread_generation;
            let count = match self.access.unread_count().await {
                Ok(count) => count,
                Err(e) => {
                    tracing::warn!(error = %e, "feed: failed to refresh unread count");
                    return false;
                }
            };

            let mut reduction = Reduction::default();
            self.state.send_modify(|s| {
                reduction = s.apply(FeedAction::UnreadCountRefreshed { count, generation });
            });
            if !reduction.refresh_unread {
                return true;
            }
            tracing::debug!(count, generation, "feed: unread count went stale in flight, re-fetching");
        }
        tracing::warn!(
            attempts = MAX_RECOUNT_ATTEMPTS,
            "feed: unread count kept changing, giving up until the next event"
        );
        false
    }
}

/// Log and swallow anything but a confirmed success.
fn confirmed(op: &'static str, result: Result<bool, ClientError>) -> bool {
    match result {
        Ok(true) => true,
        Ok(false) => {
            tracing::warn!(op, "feed: rejected by hub");
            false
        }
        Err(e) => {
            tracing::warn!(op, error = %e, "feed: request failed");
            false
        }
    }
}

pub struct NotificationFeed {
    inner: Arc<Inner>,
    authenticated: bool,
    transport: Option<Arc<RealtimeClient>>,
    listeners: Mutex<Vec<(&'static str, ListenerId)>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NotificationFeed {
    pub async fn mount(deps: FeedDeps, authenticated: bool, options: FeedOptions) -> Self {
        let (state, _) = watch::channel(FeedState::default());
        let inner = Arc::new(Inner {
            access: deps.access,
            alerts: deps.alerts,
            state,
            page_size: options.page_size,
        });

        if !authenticated {
            tracing::debug!("feed: not authenticated, staying idle");
            return Self {
                inner,
                authenticated,
                transport: None,
                listeners: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
            };
        }

        inner.load().await;

        // Listeners only forward; the pump applies events one at a time in
        // arrival order.
        let (tx, rx) = mpsc::unbounded_channel::<PushEvent>();
        let transport = deps.transport;
        let listeners = [EVENT_NEW, EVENT_UPDATE, EVENT_DELETE]
            .into_iter()
            .map(|name| {
                let tx = tx.clone();
                let id = transport.on(name, move |payload| {
                    match PushEvent::from_parts(name, payload.clone()) {
                        Ok(event) => {
                            let _ = tx.send(event);
                        }
                        Err(e) => tracing::warn!(event = name, error = %e, "feed: bad push payload"),
                    }
                });
                (name, id)
            })
            .collect::<Vec<_>>();
        drop(tx);

        let pump = tokio::spawn(pump(inner.clone(), rx));

        let connect_transport = transport.clone();
        let delay = options.connect_delay;
        let connect_timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = connect_transport.connect().await {
                tracing::warn!(error = %e, "feed: transport connect failed, retrying in background");
            }
        });

        Self {
            inner,
            authenticated,
            transport: Some(transport),
            listeners: Mutex::new(listeners),
            tasks: Mutex::new(vec![pump, connect_timer]),
        }
    }

    /// Current snapshot.
    pub fn state(&self) -> FeedState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.inner.state.subscribe()
    }

    pub async fn refresh(&self) -> bool {
        if !self.authenticated {
            return false;
        }
        self.inner.load().await
    }

    pub async fn refresh_unread_count(&self) -> bool {
        if !self.authenticated {
            return false;
        }
        self.inner.refresh_unread_count().await
    }

    pub async fn mark_as_read(&self, id: Uuid) -> bool {
        if !self.authenticated || !confirmed("mark_as_read", self.inner.access.mark_read(id).await) {
            return false;
        }
        self.inner.dispatch(FeedAction::MarkedRead(id)).await;
        true
    }

    pub async fn mark_all_as_read(&self) -> bool {
        if !self.authenticated
            || !confirmed("mark_all_as_read", self.inner.access.mark_all_read().await)
        {
            return false;
        }
        self.inner.dispatch(FeedAction::MarkedAllRead).await;
        true
    }

    /// Removes the item, then re-derives the counter from the hub.
    pub async fn delete_notification(&self, id: Uuid) -> bool {
        if !self.authenticated || !confirmed("delete_notification", self.inner.access.delete(id).await)
        {
            return false;
        }
        self.inner.dispatch(FeedAction::Removed(id)).await;
        true
    }

    pub async fn delete_all(&self) -> bool {
        if !self.authenticated || !confirmed("delete_all", self.inner.access.delete_all().await) {
            return false;
        }
        self.inner.dispatch(FeedAction::Cleared).await;
        true
    }

    /// Detach from the transport and stop background work. Idempotent.
    pub fn unmount(&self) {
        if let Some(transport) = &self.transport {
            let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            for (event, id) in listeners.drain(..) {
                transport.off(event, id);
            }
        }
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for NotificationFeed {
    fn drop(&mut self) {
        self.unmount();
    }
}

async fn pump(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<PushEvent>) {
    while let Some(event) = rx.recv().await {
        tracing::debug!(event = event.name(), "feed: applying push event");
        inner.dispatch(FeedAction::Push(event)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::DeletedNotification;
    use crate::models::notification::{NewNotification, Notification, NotificationType, Priority};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use url::Url;

    #[derive(Default)]
    struct FakeAccess {
        page: Mutex<Vec<Notification>>,
        server_unread: AtomicU64,
        reject: AtomicBool,
        offline: AtomicBool,
        list_calls: AtomicUsize,
        count_calls: AtomicUsize,
        /// Hold the next `unread_count` call until `count_release` fires.
        hold_count: AtomicBool,
        count_entered: Notify,
        count_release: Notify,
    }

    impl FakeAccess {
        fn with_page(page: Vec<Notification>) -> Arc<Self> {
            let access = Self::default();
            *access.page.lock().unwrap() = page;
            Arc::new(access)
        }

        fn outcome(&self) -> Result<bool, ClientError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(ClientError::Scheme("offline".into()));
            }
            Ok(!self.reject.load(Ordering::SeqCst))
        }
    }

    #[async_trait]
    impl NotificationAccess for FakeAccess {
        async fn list(&self, limit: i64, _offset: i64) -> Result<Vec<Notification>, ClientError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(ClientError::Scheme("offline".into()));
            }
            let page = self.page.lock().unwrap();
            Ok(page.iter().take(limit as usize).cloned().collect())
        }
        async fn unread_count(&self) -> Result<u64, ClientError> {
            self.count_calls.fetch_add(1, Ordering::SeqCst);
            let snapshot = self.server_unread.load(Ordering::SeqCst);
            if self.hold_count.swap(false, Ordering::SeqCst) {
                self.count_entered.notify_one();
                self.count_release.notified().await;
            }
            Ok(snapshot)
        }
        async fn mark_read(&self, _id: Uuid) -> Result<bool, ClientError> {
            self.outcome()
        }
        async fn mark_all_read(&self) -> Result<bool, ClientError> {
            self.outcome()
        }
        async fn delete(&self, _id: Uuid) -> Result<bool, ClientError> {
            self.outcome()
        }
        async fn delete_all(&self) -> Result<bool, ClientError> {
            self.outcome()
        }
    }

    #[derive(Default)]
    struct RecordingAlerts(Mutex<Vec<Notification>>);

    impl AlertSink for RecordingAlerts {
        fn alert(&self, notification: &Notification) {
            self.0.lock().unwrap().push(notification.clone());
        }
    }

    fn item(priority: Priority) -> Notification {
        Notification::from_new(NewNotification {
            user_id: Uuid::nil(),
            r#type: NotificationType::RevisionRequested,
            priority,
            title: "Revision requested".into(),
            message: "Client left notes on v3".into(),
            link: None,
            metadata: None,
        })
    }

    fn offline_transport() -> Arc<RealtimeClient> {
        Arc::new(RealtimeClient::with_url(
            Url::parse("ws://127.0.0.1:1/ws").unwrap(),
        ))
    }

    fn never_connect() -> FeedOptions {
        FeedOptions {
            page_size: 50,
            connect_delay: Duration::from_secs(3600),
        }
    }

    async fn mounted(
        access: Arc<FakeAccess>,
    ) -> (NotificationFeed, Arc<RealtimeClient>, Arc<RecordingAlerts>) {
        let transport = offline_transport();
        let alerts = Arc::new(RecordingAlerts::default());
        let feed = NotificationFeed::mount(
            FeedDeps {
                access,
                transport: transport.clone(),
                alerts: alerts.clone(),
            },
            true,
            never_connect(),
        )
        .await;
        (feed, transport, alerts)
    }

    fn frame(event: &PushEvent) -> String {
        serde_json::to_string(event).unwrap()
    }

    #[tokio::test]
    async fn test_unauthenticated_mount_stays_idle() {
        let access = FakeAccess::with_page(vec![item(Priority::Info)]);
        let transport = offline_transport();
        let feed = NotificationFeed::mount(
            FeedDeps {
                access: access.clone(),
                transport: transport.clone(),
                alerts: Arc::new(RecordingAlerts::default()),
            },
            false,
            FeedOptions {
                page_size: 50,
                connect_delay: Duration::from_millis(5),
            },
        )
        .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        let state = feed.state();
        assert!(!state.loading);
        assert!(state.notifications.is_empty());
        assert_eq!(state.unread_count, 0);
        assert_eq!(access.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(transport.listener_count(EVENT_NEW), 0);
        assert_eq!(
            transport.status(),
            crate::client::transport::ConnectionStatus::Disconnected
        );
        assert!(!feed.mark_all_as_read().await);
    }

    #[tokio::test]
    async fn test_mount_loads_page_and_counts_locally() {
        let mut read = item(Priority::Info);
        read.read = true;
        let access = FakeAccess::with_page(vec![item(Priority::Info), read, item(Priority::Critical)]);
        access.server_unread.store(99, Ordering::SeqCst);

        let (feed, transport, _) = mounted(access.clone()).await;
        let state = feed.state();
        assert_eq!(state.notifications.len(), 3);
        assert_eq!(state.unread_count, 2);
        assert!(!state.loading);
        assert_eq!(access.count_calls.load(Ordering::SeqCst), 0);

        for event in [EVENT_NEW, EVENT_UPDATE, EVENT_DELETE] {
            assert_eq!(transport.listener_count(event), 1);
        }
        feed.unmount();
        for event in [EVENT_NEW, EVENT_UPDATE, EVENT_DELETE] {
            assert_eq!(transport.listener_count(event), 0);
        }
    }

    #[tokio::test]
    async fn test_failed_load_leaves_empty_state() {
        let access = FakeAccess::with_page(vec![item(Priority::Info)]);
        access.offline.store(true, Ordering::SeqCst);
        let (feed, _, _) = mounted(access).await;
        assert_eq!(feed.state(), FeedState::default());
    }

    #[tokio::test]
    async fn test_mutations_apply_only_after_confirmation() {
        let first = item(Priority::Info);
        let access = FakeAccess::with_page(vec![first.clone(), item(Priority::Info)]);
        let (feed, _, _) = mounted(access.clone()).await;
        let before = feed.state();

        access.reject.store(true, Ordering::SeqCst);
        assert!(!feed.mark_as_read(first.id).await);
        assert!(!feed.delete_all().await);
        assert_eq!(feed.state(), before);

        access.reject.store(false, Ordering::SeqCst);
        access.offline.store(true, Ordering::SeqCst);
        assert!(!feed.mark_all_as_read().await);
        assert_eq!(feed.state(), before);

        access.offline.store(false, Ordering::SeqCst);
        assert!(feed.mark_as_read(first.id).await);
        let state = feed.state();
        assert_eq!(state.unread_count, 1);
        assert!(state.notifications[0].read);

        assert!(feed.mark_all_as_read().await);
        assert_eq!(feed.state().unread_count, 0);
    }

    #[tokio::test]
    async fn test_delete_rederives_count_from_hub() {
        let first = item(Priority::Info);
        let access = FakeAccess::with_page(vec![first.clone(), item(Priority::Info)]);
        access.server_unread.store(7, Ordering::SeqCst);
        let (feed, _, _) = mounted(access.clone()).await;

        assert!(feed.delete_notification(first.id).await);
        let state = feed.state();
        assert_eq!(state.notifications.len(), 1);
        assert_eq!(state.unread_count, 7);
        assert_eq!(access.count_calls.load(Ordering::SeqCst), 1);

        assert!(feed.delete_all().await);
        let state = feed.state();
        assert!(state.notifications.is_empty());
        assert_eq!(state.unread_count, 0);
    }

    #[tokio::test]
    async fn test_pushed_critical_alerts_once_info_never() {
        let access = FakeAccess::with_page(vec![]);
        let (feed, transport, alerts) = mounted(access).await;
        let mut rx = feed.subscribe();

        let critical = item(Priority::Critical);
        transport.inject_frame(&frame(&PushEvent::New(item(Priority::Info))));
        transport.inject_frame(&frame(&PushEvent::New(critical.clone())));
        transport.inject_frame(&frame(&PushEvent::New(critical.clone())));

        rx.wait_for(|s| s.notifications.len() == 2).await.unwrap();
        // Let the duplicate drain through the pump.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let recorded = alerts.0.lock().unwrap().clone();
        assert_eq!(recorded, vec![critical]);
        assert_eq!(feed.state().unread_count, 2);
    }

    #[tokio::test]
    async fn test_delete_push_for_unknown_id_still_refreshes_count() {
        let access = FakeAccess::with_page(vec![item(Priority::Info)]);
        access.server_unread.store(3, Ordering::SeqCst);
        let (feed, transport, _) = mounted(access.clone()).await;
        let list_before = feed.state().notifications;
        let mut rx = feed.subscribe();

        transport.inject_frame(&frame(&PushEvent::Delete(DeletedNotification {
            id: Uuid::new_v4(),
        })));

        rx.wait_for(|s| s.unread_count == 3).await.unwrap();
        assert_eq!(feed.state().notifications, list_before);
        assert_eq!(access.count_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mark_read_then_pushed_delete() {
        let one = item(Priority::Info);
        let two = item(Priority::Info);
        let access = FakeAccess::with_page(vec![one.clone(), two.clone()]);
        let (feed, transport, _) = mounted(access.clone()).await;
        assert_eq!(feed.state().unread_count, 2);

        assert!(feed.mark_as_read(one.id).await);
        let state = feed.state();
        assert_eq!(state.unread_count, 1);
        assert!(state.notifications[0].read);

        // Server agrees: nothing left unread once item 2 is gone.
        access.server_unread.store(0, Ordering::SeqCst);
        let mut rx = feed.subscribe();
        transport.inject_frame(&frame(&PushEvent::Delete(DeletedNotification { id: two.id })));

        rx.wait_for(|s| s.notifications.len() == 1 && s.unread_count == 0)
            .await
            .unwrap();
        assert_eq!(feed.state().notifications[0].id, one.id);
        assert_eq!(access.count_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recount_overtaken_by_local_mark_is_refetched() {
        let a = item(Priority::Info);
        let b = item(Priority::Info);
        let access = FakeAccess::with_page(vec![a.clone(), b.clone()]);
        let (feed, transport, _) = mounted(access.clone()).await;
        assert_eq!(feed.state().unread_count, 2);

        // Another session read A; the server count snapshot is taken now.
        access.server_unread.store(1, Ordering::SeqCst);
        access.hold_count.store(true, Ordering::SeqCst);
        let mut a_read = a.clone();
        a_read.read = true;
        transport.inject_frame(&frame(&PushEvent::Update(a_read)));
        tokio::time::timeout(Duration::from_secs(5), access.count_entered.notified())
            .await
            .expect("recount never started");

        access.server_unread.store(0, Ordering::SeqCst);
        assert!(feed.mark_as_read(b.id).await);
        access.count_release.notify_one();

        let mut rx = feed.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.unread_count == 0),
        )
        .await
        .expect("counter stuck on the stale recount")
        .unwrap();

        let state = feed.state();
        assert_eq!(state.local_unread(), 0);
        assert_eq!(access.count_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unmounted_feed_ignores_pushes() {
        let access = FakeAccess::with_page(vec![]);
        let (feed, transport, alerts) = mounted(access).await;
        feed.unmount();
        feed.unmount();

        transport.inject_frame(&frame(&PushEvent::New(item(Priority::Critical))));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(feed.state().notifications.is_empty());
        assert!(alerts.0.lock().unwrap().is_empty());
    }
}
