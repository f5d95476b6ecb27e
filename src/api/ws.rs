//! Push WebSocket
//!
//! Route: GET /ws?token=<jwt>
//!
//! The handler:
//!   1. Validates the user token (query parameter, or `Authorization: Bearer`)
//!   2. Subscribes to the user's push channel before answering the upgrade
//!   3. Streams every push event as a JSON text frame until either side closes
//!   4. Pings on an interval and closes sessions that stay silent past the
//!      idle timeout
//!   5. Releases the user's channel and logs the session summary on close

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::auth;
use crate::metrics;
use crate::models::event::PushEvent;
use crate::push::PushHub;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// GET /ws
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsQuery>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    // Browsers cannot set headers on a WebSocket handshake, so the query
    // parameter comes first.
    let token = params
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(auth::bearer)
                .map(str::to_string)
        })
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = auth::verify_token(&state.config.jwt_secret, &token).map_err(|e| {
        tracing::warn!(error = %e, "ws: rejected token");
        StatusCode::UNAUTHORIZED
    })?;
    let user_id = claims.sub;

    // Subscribe before the 101 goes out: once the client sees the handshake
    // complete, every later publish reaches this session.
    let events = state.hub.subscribe(user_id);

    let hub = state.hub.clone();
    let heartbeat = Heartbeat {
        ping_every: state.config.ws_ping_interval,
        idle_timeout: state.config.ws_idle_timeout,
    };
    Ok(ws.on_upgrade(move |socket| async move {
        session(socket, user_id, events, heartbeat).await;
        hub.release(user_id);
    }))
}

#[derive(Debug, Clone, Copy)]
struct Heartbeat {
    ping_every: Duration,
    idle_timeout: Duration,
}

/// Runs until either side closes. Consumes the receiver so the channel can be
/// released once this returns.
async fn session(
    socket: WebSocket,
    user_id: Uuid,
    mut events: broadcast::Receiver<PushEvent>,
    heartbeat: Heartbeat,
) {
    let started = Instant::now();
    metrics::ws_session_opened();
    tracing::info!(user_id = %user_id, "ws: session opened");

    let (mut sink, mut stream) = socket.split();
    let mut forwarded: u64 = 0;
    let mut last_seen = Instant::now();
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat.ping_every,
        heartbeat.ping_every,
    );

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if last_seen.elapsed() >= heartbeat.idle_timeout {
                    tracing::info!(user_id = %user_id, idle_ms = last_seen.elapsed().as_millis() as u64, "ws: session silent, closing");
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!(user_id = %user_id, error = %e, "ws: failed to encode push event");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                    forwarded += 1;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(user_id = %user_id, skipped, "ws: session lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                // Pongs and pings count as liveness; clients send no data.
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(e)) => {
                    tracing::debug!(user_id = %user_id, error = %e, "ws: read error");
                    break;
                }
            },
        }
    }

    let _ = sink.close().await;
    metrics::ws_session_closed();
    tracing::info!(
        user_id = %user_id,
        forwarded,
        duration_ms = started.elapsed().as_millis() as u64,
        "ws: session ended"
    );
}
