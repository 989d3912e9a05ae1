use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{generate_api_key, hash_api_key, key_prefix};
use crate::error::{AdmissionError, AdmissionResult};
use crate::state::AppState;
use crate::types::{Application, ApplicationSettings};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_app))
        .route("/:id/regenerate-key", post(regenerate_key))
}

#[derive(Debug, Deserialize)]
pub struct CreateAppRequest {
    pub app_name: String,
    pub settings: ApplicationSettings,
}

#[derive(Debug, Serialize)]
pub struct CreateAppResponse {
    pub app_id: String,
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct RegenerateKeyResponse {
    pub api_key: String,
}

async fn create_app(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateAppRequest>,
) -> AdmissionResult<Json<CreateAppResponse>> {
    if body.app_name.trim().is_empty() {
        return Err(AdmissionError::Validation("app_name must not be empty".to_string()));
    }

    let app_id = Uuid::new_v4().to_string();
    let api_key = generate_api_key();
    let api_key_hash = hash_api_key(&api_key).map_err(|e| AdmissionError::Validation(e.to_string()))?;

    state
        .store
        .create_application(Application {
            app_id: app_id.clone(),
            name: body.app_name,
            api_key_hash,
            settings: body.settings,
        })
        .await?;

    state.api_key_index.insert(key_prefix(&api_key), app_id.clone());

    Ok(Json(CreateAppResponse { app_id, api_key }))
}

async fn regenerate_key(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
) -> AdmissionResult<Json<RegenerateKeyResponse>> {
    let mut application = state
        .store
        .get_application(&app_id)
        .await?
        .ok_or(AdmissionError::NotFound("application"))?;

    let api_key = generate_api_key();
    application.api_key_hash = hash_api_key(&api_key).map_err(|e| AdmissionError::Validation(e.to_string()))?;
    state.store.update_application(application).await?;
    state.api_key_index.insert(key_prefix(&api_key), app_id);

    Ok(Json(RegenerateKeyResponse { api_key }))
}
