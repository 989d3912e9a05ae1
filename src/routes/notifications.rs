use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::auth::AuthApp;
use crate::error::{AdmissionError, AdmissionResult};
use crate::state::AppState;
use crate::types::{Notification, NotificationStatus, SendRequest};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_notification))
        .route("/:id", get(get_notification).delete(cancel_notification))
        .route("/:id/retry", post(retry_notification))
}

#[derive(Debug, Serialize)]
pub struct CreateNotificationResponse {
    pub notification_id: String,
    pub status: NotificationStatus,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub notification_id: String,
}

async fn create_notification(
    State(state): State<Arc<AppState>>,
    AuthApp(app): AuthApp,
    Json(mut request): Json<SendRequest>,
) -> Result<(StatusCode, Json<CreateNotificationResponse>), AdmissionError> {
    request.app_id = app.app_id;
    let notification = state.admission.admit(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CreateNotificationResponse {
            notification_id: notification.notification_id,
            status: notification.status,
        }),
    ))
}

async fn get_notification(
    State(state): State<Arc<AppState>>,
    AuthApp(_app): AuthApp,
    Path(notification_id): Path<String>,
) -> AdmissionResult<Json<Notification>> {
    let notification = state
        .store
        .get_notification(&notification_id)
        .await?
        .ok_or(AdmissionError::NotFound("notification"))?;
    Ok(Json(notification))
}

/// 409 specifically for an already-terminal target, diverging from
/// `AdmissionError`'s default 422 mapping for validation failures — handled
/// here rather than by widening the global mapping.
struct CancelConflict;

impl IntoResponse for CancelConflict {
    fn into_response(self) -> Response {
        (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "code": "ALREADY_TERMINAL", "message": "notification is not cancellable" })),
        )
            .into_response()
    }
}

async fn cancel_notification(
    State(state): State<Arc<AppState>>,
    AuthApp(_app): AuthApp,
    Path(notification_id): Path<String>,
) -> Response {
    match state.admission.cancel(&notification_id).await {
        Ok(_) => Json(serde_json::json!({})).into_response(),
        Err(AdmissionError::Validation(_)) => CancelConflict.into_response(),
        Err(other) => other.into_response(),
    }
}

async fn retry_notification(
    State(state): State<Arc<AppState>>,
    AuthApp(_app): AuthApp,
    Path(notification_id): Path<String>,
) -> Response {
    let mut notification = match state.store.get_notification(&notification_id).await {
        Ok(Some(n)) => n,
        Ok(None) => return AdmissionError::NotFound("notification").into_response(),
        Err(e) => return AdmissionError::Core(e).into_response(),
    };

    if notification.status != NotificationStatus::Failed {
        return CancelConflict.into_response();
    }

    let dlq = match state.broker.dlq_list(usize::MAX).await {
        Ok(entries) => entries,
        Err(e) => return AdmissionError::Core(e).into_response(),
    };
    let Some(entry) = dlq.iter().find(|e| e.job.notification_id == notification_id) else {
        return AdmissionError::NotFound("dlq entry").into_response();
    };

    if let Err(e) = state.broker.dlq_replay(&entry.job.job_id).await {
        return AdmissionError::Core(e).into_response();
    }

    notification.status = NotificationStatus::Queued;
    notification.last_error = None;
    notification.updated_at = Utc::now();
    if let Err(e) = state.store.update_notification(notification).await {
        return AdmissionError::Core(e).into_response();
    }

    Json(RetryResponse { notification_id }).into_response()
}
