use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Synchronous rejections the admission engine can return to the caller.
/// Each variant has a stable HTTP status and machine-readable code; the
/// mapping is contractual (tests assert on the code, not just the status).
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("channel not enabled for this application")]
    ChannelDisabled,

    #[error("user has opted out of this channel")]
    UserOptedOut,

    #[error("user has do-not-disturb enabled")]
    Dnd,

    #[error("daily notification limit exceeded")]
    DailyLimit,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("template render failed: {0}")]
    TemplateRender(#[from] crate::template::RenderError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AdmissionError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AdmissionError::ChannelDisabled => (StatusCode::FORBIDDEN, "CHANNEL_DISABLED"),
            AdmissionError::UserOptedOut => (StatusCode::FORBIDDEN, "USER_OPTED_OUT"),
            AdmissionError::Dnd => (StatusCode::FORBIDDEN, "DND"),
            AdmissionError::DailyLimit => (StatusCode::TOO_MANY_REQUESTS, "DAILY_LIMIT"),
            AdmissionError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            AdmissionError::TemplateRender(_) => (StatusCode::BAD_REQUEST, "TEMPLATE_RENDER_ERROR"),
            AdmissionError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            AdmissionError::Core(e) => {
                tracing::error!("core error during admission: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let message = match &self {
            AdmissionError::Core(_) => "an internal error occurred".to_string(),
            other => other.to_string(),
        };

        (status, Json(ErrorBody { code, message })).into_response()
    }
}

/// Infrastructure failures from the store, broker, or presence registry.
/// These never reach the caller directly; they're wrapped by whichever
/// higher-level error the call site returns (`AdmissionError::Core` or a
/// logged-and-swallowed orchestrator failure per the at-least-once design).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("store error: {0}")]
    Store(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("presence registry error: {0}")]
    Presence(String),

    #[error("rate limiter error: {0}")]
    Limiter(String),

    #[error("provider manager error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type AdmissionResult<T> = Result<T, AdmissionError>;
pub type CoreResult<T> = Result<T, CoreError>;
