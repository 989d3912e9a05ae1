use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthApp;
use crate::error::{AdmissionError, AdmissionResult};
use crate::state::AppState;
use crate::types::{Channel, Template};

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(create_template))
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub channel: Channel,
    pub subject: Option<String>,
    pub body: String,
    #[serde(default)]
    pub variables: Vec<String>,
}

async fn create_template(
    State(state): State<Arc<AppState>>,
    AuthApp(app): AuthApp,
    Json(body): Json<CreateTemplateRequest>,
) -> AdmissionResult<Json<Template>> {
    if body.body.trim().is_empty() {
        return Err(AdmissionError::Validation("body must not be empty".to_string()));
    }

    let template = Template {
        template_id: Uuid::new_v4().to_string(),
        app_id: app.app_id,
        channel: body.channel,
        subject: body.subject,
        body: body.body,
        declared_variables: body.variables,
    };
    let template = state.store.create_template(template).await?;
    Ok(Json(template))
}
