use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Training failed")]
    TrainingFailed,

    #[error("prediction failed: {0}")]
    Predict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("model storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

fn log_error(error: &ApiError) {
    match error {
        ApiError::BadRequest(message) => warn!("Bad Request: {}", message),
        ApiError::Multipart(e) => warn!("Multipart -> {}", e.body_text()),
        ApiError::TrainingFailed => warn!("Train -> no usable faces"),
        ApiError::Predict(message) => error!("Predict -> {}", message),
        ApiError::NotFound(what) => warn!("Model not found: {}", what),
        ApiError::Storage(message) => error!("Model storage -> {}", message),
        ApiError::Internal(message) => error!("Internal error: {}", message),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log_error(&self);

        match self {
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            Self::Multipart(e) => (e.status(), Json(json!({ "error": e.body_text() }))).into_response(),
            Self::TrainingFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": "Training failed" })),
            )
                .into_response(),
            Self::Predict(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "results": {}, "error": message })),
            )
                .into_response(),
            // Model management answers with bare status codes.
            Self::NotFound(_) => StatusCode::NOT_FOUND.into_response(),
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            Self::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": message })),
            )
                .into_response(),
        }
    }
}
