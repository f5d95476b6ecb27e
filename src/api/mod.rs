use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::{self, AuthUser};
use crate::errors::AppError;
use crate::metrics;
use crate::AppState;

pub mod handlers;
pub mod ws;

/// Build the full hub application: health, metrics, push socket and the REST API.
pub fn app(state: Arc<AppState>) -> Router {
    let dashboard_origin = state.config.dashboard_origin.clone();

    Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        // Push socket authenticates its own token (query parameter)
        .route("/ws", get(ws::ws_handler))
        .nest("/api/v1", api_router(state.clone()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                // NOTE: Cannot use AllowHeaders::any() with allow_credentials(true) under CORS rules
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-admin-key"),
                    HeaderName::from_static("x-request-id"),
                ])
                .allow_credentials(true),
        )
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

/// Build the REST router.
/// All routes are relative; the caller mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let user_routes = Router::new()
        .route(
            "/notifications",
            get(handlers::list_notifications).delete(handlers::delete_all_notifications),
        )
        .route(
            "/notifications/unread",
            get(handlers::count_unread_notifications),
        )
        .route(
            "/notifications/read-all",
            post(handlers::mark_all_notifications_read),
        )
        .route(
            "/notifications/:id/read",
            post(handlers::mark_notification_read),
        )
        .route("/notifications/:id", delete(handlers::delete_notification))
        .route("/preferences", get(handlers::get_preferences))
        .route(
            "/preferences/:channel/:key",
            put(handlers::set_preference),
        )
        .layer(middleware::from_fn_with_state(state.clone(), user_auth));

    let admin_routes = Router::new()
        .route("/admin/notifications", post(handlers::create_notification))
        .layer(middleware::from_fn_with_state(state, admin_auth));

    user_routes
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: validates the user's bearer token and records the caller.
async fn user_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(auth::bearer)
        .ok_or_else(|| {
            tracing::debug!("api: missing bearer token");
            AppError::Unauthorized
        })?;

    let claims = auth::verify_token(&state.config.jwt_secret, token).map_err(|e| {
        tracing::warn!(error = %e, "api: rejected token");
        AppError::Unauthorized
    })?;

    req.extensions_mut().insert(AuthUser(claims.sub));
    Ok(next.run(req).await)
}

/// Middleware: validates `X-Admin-Key` against the configured producer key.
/// Returns 401 if missing/invalid, 503 if no key is configured.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected = state.config.admin_key.as_deref().ok_or_else(|| {
        tracing::error!("NOTIFY_HUB_ADMIN_KEY is not set, producer API disabled");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok());

    match provided_key {
        Some(k) if auth::admin_key_matches(k, expected) => Ok(next.run(req).await),
        Some(k) => {
            // SECURITY: Never log the expected key or the full provided key
            tracing::warn!("admin API: invalid key (provided: '{}')", auth::mask(k));
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    // Any cheap round-trip proves the store is reachable.
    state
        .store
        .count_unread_notifications(Uuid::nil())
        .await
        .map(|_| "ok")
        .map_err(|e| {
            tracing::warn!(error = %e, "readiness: store unreachable");
            StatusCode::SERVICE_UNAVAILABLE
        })
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        metrics::encode_metrics(),
    )
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate errors with hub logs.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    // Notification payloads are per-user; never cache them.
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::notification::email::EmailDispatcher;
    use crate::store::memory::MemoryStore;
    use axum::body::Body;
    use chrono::Duration;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";
    const ADMIN: &str = "admin-key-123456";

    fn test_app() -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState::new(
            Arc::new(MemoryStore::new()),
            EmailDispatcher::disabled(),
            Config::for_tests(SECRET, ADMIN),
        ));
        (app(state.clone()), state)
    }

    fn bearer_for(user: Uuid) -> String {
        format!(
            "Bearer {}",
            auth::issue_token(SECRET, user, Duration::hours(1)).unwrap()
        )
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_healthz_has_security_headers() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(axum::http::Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
        assert!(resp.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_api_requires_token() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/v1/notifications")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "unauthorized");
    }

    #[tokio::test]
    async fn test_producer_route_rejects_user_token() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/v1/admin/notifications")
                    .header("authorization", bearer_for(Uuid::new_v4()))
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_then_list_unread_and_mark_read() {
        let (app, _) = test_app();
        let user = Uuid::new_v4();

        let create = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/v1/admin/notifications")
                    .header("x-admin-key", ADMIN)
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "user_id": user,
                            "type": "deadline_approaching",
                            "priority": "critical",
                            "title": "Deadline tomorrow",
                            "message": "Trailer cut due 09:00"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create.status(), StatusCode::CREATED);
        let outcome = body_json(create).await;
        let id = outcome["notification"]["id"].as_str().unwrap().to_string();

        let unread = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/v1/notifications/unread")
                    .header("authorization", bearer_for(user))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(unread).await["count"], 1);

        let mark = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(format!("/api/v1/notifications/{}/read", id))
                    .header("authorization", bearer_for(user))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(mark).await["success"], true);

        let list = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/v1/notifications?limit=10")
                    .header("authorization", bearer_for(user))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let items = body_json(list).await;
        assert_eq!(items.as_array().unwrap().len(), 1);
        assert_eq!(items[0]["read"], true);
    }

    #[tokio::test]
    async fn test_mark_read_of_foreign_notification_fails() {
        let (app, state) = test_app();
        let owner = Uuid::new_v4();
        let n = state
            .store
            .create_notification(crate::models::notification::NewNotification {
                user_id: owner,
                r#type: crate::models::notification::NotificationType::ChatMessage,
                priority: Default::default(),
                title: "hi".into(),
                message: "hello".into(),
                link: None,
                metadata: None,
            })
            .await
            .unwrap();

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(format!("/api/v1/notifications/{}/read", n.id))
                    .header("authorization", bearer_for(Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["success"], false);
        assert_eq!(state.store.count_unread_notifications(owner).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_id_is_bad_request() {
        let (app, _) = test_app();
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("DELETE")
                    .uri("/api/v1/notifications/not-a-uuid")
                    .header("authorization", bearer_for(Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_set_preference_validates_channel_and_key() {
        let (app, _) = test_app();
        let user = Uuid::new_v4();

        let bad = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("PUT")
                    .uri("/api/v1/preferences/sms/chat_message")
                    .header("authorization", bearer_for(user))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"enabled": false}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let ok = app
            .oneshot(
                axum::http::Request::builder()
                    .method("PUT")
                    .uri("/api/v1/preferences/email/chat_message")
                    .header("authorization", bearer_for(user))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"enabled": false}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        let prefs = body_json(ok).await;
        assert_eq!(prefs["email_notifications"]["chat_message"], false);
    }
}
