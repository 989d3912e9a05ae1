use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthApp;
use crate::error::{AdmissionError, AdmissionResult};
use crate::state::AppState;
use crate::types::{Channel, Device, User, UserPreferences};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_user))
        .route("/:id", put(update_user))
        .route("/:id/checkin", post(checkin))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub external_user_id: String,
    #[serde(default)]
    pub preferences: Option<PartialPreferences>,
    #[serde(default)]
    pub devices: Vec<Device>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialPreferences {
    pub channel_enabled: Option<HashMap<Channel, bool>>,
    pub dnd: Option<bool>,
    pub dnd_window: Option<(u8, u8)>,
    pub daily_limit: Option<u32>,
}

impl PartialPreferences {
    fn apply(self, base: &mut UserPreferences) {
        if let Some(v) = self.channel_enabled {
            base.channel_enabled = v;
        }
        if let Some(v) = self.dnd {
            base.dnd = v;
        }
        if let Some(v) = self.dnd_window {
            base.dnd_window = Some(v);
        }
        if let Some(v) = self.daily_limit {
            base.daily_limit = v;
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckinRequest {
    pub dynamic_url: String,
    pub ttl_s: i64,
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    AuthApp(app): AuthApp,
    Json(body): Json<CreateUserRequest>,
) -> AdmissionResult<Json<CreateUserResponse>> {
    if body.external_user_id.trim().is_empty() {
        return Err(AdmissionError::Validation("external_user_id must not be empty".to_string()));
    }

    let mut preferences = UserPreferences::default();
    if let Some(partial) = body.preferences {
        partial.apply(&mut preferences);
    }

    let user_id = Uuid::new_v4().to_string();
    state
        .store
        .create_user(User {
            app_id: app.app_id.clone(),
            user_id: user_id.clone(),
            external_user_id: body.external_user_id,
            default_webhook_url: None,
            devices: body.devices,
            preferences,
            deleted: false,
        })
        .await?;

    Ok(Json(CreateUserResponse { user_id }))
}

async fn update_user(
    State(state): State<Arc<AppState>>,
    AuthApp(app): AuthApp,
    Path(user_id): Path<String>,
    Json(partial): Json<PartialPreferences>,
) -> AdmissionResult<Json<User>> {
    let mut user = state
        .store
        .get_user(&app.app_id, &user_id)
        .await?
        .ok_or(AdmissionError::NotFound("user"))?;

    partial.apply(&mut user.preferences);
    let user = state.store.update_user(user).await?;
    Ok(Json(user))
}

async fn checkin(
    State(state): State<Arc<AppState>>,
    AuthApp(app): AuthApp,
    Path(user_id): Path<String>,
    Json(body): Json<CheckinRequest>,
) -> AdmissionResult<Json<serde_json::Value>> {
    state
        .store
        .get_user(&app.app_id, &user_id)
        .await?
        .ok_or(AdmissionError::NotFound("user"))?;

    state
        .presence
        .set(&app.app_id, &user_id, &body.dynamic_url, chrono::Duration::seconds(body.ttl_s.max(1)))
        .await?;
    state.admission.checkin(&app.app_id, &user_id).await?;

    Ok(Json(serde_json::json!({})))
}
