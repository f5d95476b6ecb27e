use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::event::{DeletedNotification, PushEvent};
use crate::models::notification::{NewNotification, Notification, NotificationType};
use crate::models::preference::{Channel, NotificationPreferences};
use crate::notification::delivery::DeliveryOutcome;
use crate::store::page_bounds;
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct PaginationParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct SetPreferenceRequest {
    pub enabled: bool,
}

fn parse_id(id_str: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id_str)
        .map_err(|_| AppError::BadRequest(format!("invalid notification id: {}", id_str)))
}

// ── Notifications ────────────────────────────────────────────

/// GET /api/v1/notifications: newest first, `limit` (default 50, max 100) and `offset`
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let (limit, offset) = page_bounds(params.limit, params.offset);
    let notifs = state
        .store
        .list_notifications(user_id, limit, offset)
        .await
        .map_err(|e| {
            tracing::error!("list_notifications failed: {}", e);
            AppError::Internal(e)
        })?;

    Ok(Json(notifs))
}

/// GET /api/v1/notifications/unread: count unread
pub async fn count_unread_notifications(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.store.count_unread_notifications(user_id).await?;
    Ok(Json(json!({ "count": count })))
}

/// POST /api/v1/notifications/:id/read: mark as read
///
/// Other sessions of the same user receive `notification:update`.
pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id_str): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id_str)?;

    let updated = state.store.mark_notification_read(id, user_id).await?;
    let success = match updated {
        Some(row) => {
            state.hub.publish(user_id, PushEvent::Update(row));
            true
        }
        None => {
            tracing::debug!(user_id = %user_id, id = %id, "mark_notification_read: not found");
            false
        }
    };

    Ok(Json(json!({ "success": success })))
}

/// POST /api/v1/notifications/read-all: mark all as read
pub async fn mark_all_notifications_read(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, AppError> {
    let updated = state.store.mark_all_notifications_read(user_id).await?;
    Ok(Json(json!({ "success": true, "updated": updated })))
}

/// DELETE /api/v1/notifications/:id: delete one
///
/// Other sessions of the same user receive `notification:delete`.
pub async fn delete_notification(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id_str): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id_str)?;

    let success = state.store.delete_notification(id, user_id).await?;
    if success {
        state
            .hub
            .publish(user_id, PushEvent::Delete(DeletedNotification { id }));
    }

    Ok(Json(json!({ "success": success })))
}

/// DELETE /api/v1/notifications: delete all of the caller's notifications
pub async fn delete_all_notifications(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, AppError> {
    let deleted = state.store.delete_all_notifications(user_id).await?;
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

// ── Preferences ──────────────────────────────────────────────

/// GET /api/v1/preferences: created with everything enabled on first read
pub async fn get_preferences(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<NotificationPreferences>, AppError> {
    let prefs = state.store.get_preferences(user_id).await?;
    Ok(Json(prefs))
}

/// PUT /api/v1/preferences/:channel/:key: set one flag
pub async fn set_preference(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path((channel, key)): Path<(String, String)>,
    Json(payload): Json<SetPreferenceRequest>,
) -> Result<Json<NotificationPreferences>, AppError> {
    let channel: Channel = channel.parse().map_err(AppError::BadRequest)?;
    let kind: NotificationType = key.parse().map_err(AppError::BadRequest)?;

    let prefs = state
        .store
        .set_preference(user_id, channel, kind.as_str(), payload.enabled)
        .await?;

    tracing::info!(
        user_id = %user_id,
        channel = %channel,
        key = %kind,
        enabled = payload.enabled,
        "notification preference updated"
    );
    Ok(Json(prefs))
}

// ── Producers ────────────────────────────────────────────────

/// POST /api/v1/admin/notifications: create and deliver a notification
///
/// Used by server-side producers (deadline job, chat, invoicing).
pub async fn create_notification(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewNotification>,
) -> Result<(StatusCode, Json<DeliveryOutcome>), AppError> {
    if payload.title.trim().is_empty() {
        return Err(AppError::BadRequest("title must not be empty".into()));
    }

    let outcome = state.deliverer.deliver(payload).await?;
    let status = if outcome.notification.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}
