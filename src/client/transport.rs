//! Real-time transport: one shared WebSocket to the hub's `/ws` endpoint,
//! multiplexing named push events to registered listeners.
//!
//! The client is created once by the composition root and handed to its
//! consumers as `Arc<RealtimeClient>`. After a connection drops, or goes
//! silent for longer than the idle timeout, it reconnects with capped
//! exponential backoff until `disconnect()` is called. A handshake the hub
//! rejects with a 4xx (bad or expired token) is final.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::errors::ClientError;
use crate::models::event::Envelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Reconnecting,
}

/// Handle returned by [`RealtimeClient::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Delay between reconnection attempts: `base * 2^attempt`, capped at `max`,
/// plus up to half of `base` of random jitter.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let capped = exp.min(self.max);
        let jitter_ms = (self.base.as_millis() / 2) as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        capped + jitter
    }
}

/// The hub pings every 20s; twice that without a frame means the link is dead.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(45);

/// Build the push socket URL from the hub's REST base URL.
///
/// `http://host:8080` → `ws://host:8080/ws?token=...`
pub fn ws_url(api_url: &str, token: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(api_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ClientError::Scheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::Scheme(scheme.to_string()))?;
    url.set_path("/ws");
    url.set_query(None);
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

struct Shared {
    url: Url,
    policy: ReconnectPolicy,
    idle_timeout: Duration,
    listeners: Mutex<HashMap<String, Vec<(ListenerId, Listener)>>>,
    status: watch::Sender<ConnectionStatus>,
}

impl Shared {
    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    /// Route one text frame to the listeners registered for its event name.
    fn dispatch(&self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "realtime: dropping malformed frame");
                return;
            }
        };

        // Snapshot under the lock; listeners run without it so they may
        // call `on`/`off` themselves.
        let targets: Vec<Listener> = match self.listeners.lock() {
            Ok(map) => map
                .get(&envelope.event)
                .map(|ls| ls.iter().map(|(_, l)| l.clone()).collect())
                .unwrap_or_default(),
            Err(_) => return,
        };

        tracing::debug!(event = %envelope.event, listeners = targets.len(), "realtime: event received");
        for listener in targets {
            listener(&envelope.payload);
        }
    }
}

pub struct RealtimeClient {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self, ClientError> {
        Ok(Self::with_url(ws_url(api_url, token)?))
    }

    /// Use an already-built WebSocket URL.
    pub fn with_url(url: Url) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            shared: Arc::new(Shared {
                url,
                policy: ReconnectPolicy::default(),
                idle_timeout: DEFAULT_IDLE_TIMEOUT,
                listeners: Mutex::new(HashMap::new()),
                status,
            }),
            next_id: AtomicU64::new(1),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Override the reconnection policy. Only valid before the client is shared.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.policy = policy;
        }
        self
    }

    /// Override how long a connection may stay silent before it is dropped.
    /// Half-way through, the client sends a ping of its own. Only valid
    /// before the client is shared.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.idle_timeout = idle_timeout;
        }
        self
    }

    /// Register `listener` for `event`. Listeners run on the connection task
    /// and must not block.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut map) = self.shared.listeners.lock() {
            map.entry(event.to_string())
                .or_default()
                .push((id, Arc::new(listener)));
        }
        id
    }

    /// Remove a listener. Returns false if it was not registered for `event`.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let Ok(mut map) = self.shared.listeners.lock() else {
            return false;
        };
        let Some(list) = map.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(event);
        }
        removed
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.shared
            .listeners
            .lock()
            .map(|map| map.get(event).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Feed a raw frame through listener routing, as if it came off the socket.
    #[cfg(test)]
    pub(crate) fn inject_frame(&self, text: &str) {
        self.shared.dispatch(text);
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Open the connection. A no-op while a connection task is running.
    ///
    /// Returns the outcome of the first attempt; the task keeps retrying in
    /// the background either way.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        let (first_tx, first_rx) = oneshot::channel();
        *task = Some(tokio::spawn(run(self.shared.clone(), first_tx)));
        first_rx.await.unwrap_or(Ok(()))
    }

    pub async fn disconnect(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            tracing::info!(url = %redacted(&self.shared.url), "realtime: disconnected");
        }
        self.shared.set_status(ConnectionStatus::Disconnected);
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.try_lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

/// URL without the token, for logs.
fn redacted(url: &Url) -> String {
    let mut u = url.clone();
    u.set_query(None);
    u.to_string()
}

/// Handshake answered with an HTTP client error: retrying cannot help.
fn is_rejected(e: &tokio_tungstenite::tungstenite::Error) -> bool {
    matches!(e, tokio_tungstenite::tungstenite::Error::Http(resp) if resp.status().is_client_error())
}

async fn run(shared: Arc<Shared>, first: oneshot::Sender<Result<(), ClientError>>) {
    let mut first = Some(first);
    let mut attempt: u32 = 0;
    let target = redacted(&shared.url);
    let probe_after = shared.idle_timeout / 2;

    loop {
        match connect_async(shared.url.as_str()).await {
            Ok((ws, _resp)) => {
                attempt = 0;
                shared.set_status(ConnectionStatus::Connected);
                tracing::info!(url = %target, "realtime: connected");
                if let Some(tx) = first.take() {
                    let _ = tx.send(Ok(()));
                }

                let (mut sink, mut stream) = ws.split();
                let mut probing = false;
                loop {
                    let msg = match tokio::time::timeout(probe_after, stream.next()).await {
                        Ok(Some(msg)) => {
                            probing = false;
                            msg
                        }
                        Ok(None) => break,
                        Err(_) if !probing => {
                            probing = true;
                            if sink.send(Message::Ping(Vec::new())).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        Err(_) => {
                            tracing::warn!(url = %target, idle_ms = shared.idle_timeout.as_millis() as u64, "realtime: connection silent, dropping");
                            break;
                        }
                    };
                    match msg {
                        Ok(Message::Text(text)) => shared.dispatch(&text),
                        Ok(Message::Ping(payload)) => {
                            if sink.send(Message::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(error = %e, "realtime: read error");
                            break;
                        }
                    }
                }
                tracing::warn!(url = %target, "realtime: connection lost");
            }
            Err(e) if is_rejected(&e) => {
                tracing::warn!(url = %target, error = %e, "realtime: handshake rejected, not retrying");
                shared.set_status(ConnectionStatus::Disconnected);
                if let Some(tx) = first.take() {
                    let _ = tx.send(Err(e.into()));
                }
                return;
            }
            Err(e) => {
                tracing::warn!(url = %target, attempt, error = %e, "realtime: connect failed");
                if let Some(tx) = first.take() {
                    let _ = tx.send(Err(e.into()));
                }
            }
        }

        shared.set_status(ConnectionStatus::Reconnecting);
        let delay = shared.policy.delay(attempt);
        attempt = attempt.saturating_add(1);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_ws_url_derivation() {
        let url = ws_url("http://localhost:8080", "abc").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/ws?token=abc");

        let url = ws_url("https://hub.example.com/api/v1/", "t").unwrap();
        assert_eq!(url.as_str(), "wss://hub.example.com/ws?token=t");

        assert!(matches!(
            ws_url("ftp://hub.example.com", "t"),
            Err(ClientError::Scheme(_))
        ));
        assert!(ws_url("not a url", "t").is_err());
    }

    #[test]
    fn test_reconnect_delay_is_capped() {
        let policy = ReconnectPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        let first = policy.delay(0);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        let late = policy.delay(30);
        assert!(late >= Duration::from_secs(1) && late <= Duration::from_millis(1050));
    }

    #[test]
    fn test_on_off_and_dispatch() {
        let client = RealtimeClient::with_url(Url::parse("ws://localhost:1/ws").unwrap());
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        let id = client.on("notification:new", move |payload| {
            assert_eq!(payload["title"], "hello");
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(client.listener_count("notification:new"), 1);

        client
            .shared
            .dispatch(r#"{"event":"notification:new","payload":{"title":"hello"}}"#);
        client
            .shared
            .dispatch(r#"{"event":"notification:delete","payload":{"id":"x"}}"#);
        client.shared.dispatch("not json");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(client.off("notification:new", id));
        assert!(!client.off("notification:new", id));
        client
            .shared
            .dispatch(r#"{"event":"notification:new","payload":{"title":"hello"}}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_reports_and_keeps_retrying() {
        // Nothing listens on port 1.
        let client = RealtimeClient::with_url(Url::parse("ws://127.0.0.1:1/ws").unwrap())
            .with_reconnect(ReconnectPolicy {
                base: Duration::from_millis(10),
                max: Duration::from_millis(20),
            });

        assert!(client.connect().await.is_err());
        let mut status = client.status_changes();
        status
            .wait_for(|s| *s == ConnectionStatus::Reconnecting)
            .await
            .unwrap();

        // Task still alive: a second connect is a no-op.
        assert!(client.connect().await.is_ok());

        client.disconnect().await;
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    /// Accepts WebSocket handshakes and then never reads or writes again,
    /// like a peer behind a dropped NAT mapping.
    async fn silent_server() -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("ws://{}/ws", listener.local_addr().unwrap())).unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((tcp, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(tcp).await {
                    held.push(ws);
                }
            }
        });
        url
    }

    #[tokio::test]
    async fn test_silent_connection_is_dropped_and_retried() {
        let url = silent_server().await;
        let client = RealtimeClient::with_url(url)
            .with_idle_timeout(Duration::from_millis(200))
            .with_reconnect(ReconnectPolicy {
                base: Duration::from_millis(500),
                max: Duration::from_secs(1),
            });
        let mut status = client.status_changes();

        assert!(client.connect().await.is_ok());
        assert_eq!(client.status(), ConnectionStatus::Connected);

        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| *s == ConnectionStatus::Reconnecting),
        )
        .await
        .expect("silent connection was never dropped")
        .unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| *s == ConnectionStatus::Connected),
        )
        .await
        .expect("client did not reconnect")
        .unwrap();

        client.disconnect().await;
    }

    #[test]
    fn test_only_client_errors_are_terminal() {
        use tokio_tungstenite::tungstenite::http::Response;
        use tokio_tungstenite::tungstenite::Error as WsError;

        let rejected = |code: u16| {
            WsError::Http(Response::builder().status(code).body(None).unwrap())
        };
        assert!(is_rejected(&rejected(401)));
        assert!(is_rejected(&rejected(403)));
        assert!(!is_rejected(&rejected(502)));
        assert!(!is_rejected(&WsError::ConnectionClosed));
    }
}
