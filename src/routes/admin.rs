use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::AuthApp;
use crate::broker::QueueStats;
use crate::error::{AdmissionError, AdmissionResult};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/queues/stats", get(queue_stats))
        .route("/queues/dlq/replay", post(dlq_replay))
}

#[derive(Debug, Deserialize)]
pub struct ReplayRequest {
    pub job_id: String,
}

async fn queue_stats(State(state): State<Arc<AppState>>, AuthApp(_app): AuthApp) -> AdmissionResult<Json<QueueStats>> {
    let stats = state.broker.stats().await?;
    Ok(Json(stats))
}

async fn dlq_replay(
    State(state): State<Arc<AppState>>,
    AuthApp(_app): AuthApp,
    Json(body): Json<ReplayRequest>,
) -> AdmissionResult<Json<serde_json::Value>> {
    let dlq = state.broker.dlq_list(usize::MAX).await?;
    if !dlq.iter().any(|e| e.job.job_id == body.job_id) {
        return Err(AdmissionError::NotFound("dlq entry"));
    }
    state.broker.dlq_replay(&body.job_id).await?;
    Ok(Json(serde_json::json!({})))
}
