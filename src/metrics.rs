//! Prometheus metrics for the notification hub.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Metrics live in the global default registry and are registered on first use.

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec, IntGauge,
    TextEncoder,
};

struct HubMetrics {
    notifications_created_total: IntCounterVec,
    notifications_suppressed_total: IntCounterVec,
    push_events_total: IntCounterVec,
    email_dispatch_total: IntCounterVec,
    ws_sessions: IntGauge,
}

static METRICS: Lazy<HubMetrics> = Lazy::new(|| HubMetrics {
    notifications_created_total: register_int_counter_vec!(
        opts!("notify_hub_notifications_created_total", "Notifications stored for in-app delivery"),
        &["type", "priority"]
    )
    .expect("failed to register notify_hub_notifications_created_total"),
    notifications_suppressed_total: register_int_counter_vec!(
        opts!(
            "notify_hub_notifications_suppressed_total",
            "Deliveries skipped because the user disabled the channel"
        ),
        &["type", "channel"]
    )
    .expect("failed to register notify_hub_notifications_suppressed_total"),
    push_events_total: register_int_counter_vec!(
        opts!("notify_hub_push_events_total", "Push events published, by delivery"),
        &["event", "delivered"]
    )
    .expect("failed to register notify_hub_push_events_total"),
    email_dispatch_total: register_int_counter_vec!(
        opts!("notify_hub_email_dispatch_total", "E-mail function calls by outcome"),
        &["outcome"]
    )
    .expect("failed to register notify_hub_email_dispatch_total"),
    ws_sessions: register_int_gauge!(opts!(
        "notify_hub_ws_sessions",
        "Currently open WebSocket sessions"
    ))
    .expect("failed to register notify_hub_ws_sessions"),
});

pub fn notification_created(kind: &str, priority: &str) {
    METRICS
        .notifications_created_total
        .with_label_values(&[kind, priority])
        .inc();
}

pub fn notification_suppressed(kind: &str, channel: &str) {
    METRICS
        .notifications_suppressed_total
        .with_label_values(&[kind, channel])
        .inc();
}

pub fn push_published(event: &str, sessions: usize) {
    let delivered = if sessions > 0 { "true" } else { "false" };
    METRICS
        .push_events_total
        .with_label_values(&[event, delivered])
        .inc();
}

pub fn email_dispatched(success: bool) {
    let outcome = if success { "delivered" } else { "failed" };
    METRICS.email_dispatch_total.with_label_values(&[outcome]).inc();
}

pub fn ws_session_opened() {
    METRICS.ws_sessions.inc();
}

pub fn ws_session_closed() {
    METRICS.ws_sessions.dec();
}

/// Encode all registered metrics as Prometheus text format.
/// Called by the `/metrics` HTTP handler.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────
