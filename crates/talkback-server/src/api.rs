//! Shared HTTP error type.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Errors returned by HTTP handlers, rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unprocessable: {0}")]
    Unprocessable(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("gateway timeout: {0}")]
    GatewayTimeout(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<talkback_voice::VoiceError> for ApiError {
    fn from(e: talkback_voice::VoiceError) -> Self {
        use talkback_voice::VoiceError;
        match e {
            VoiceError::Timeout { .. } => ApiError::GatewayTimeout(e.to_string()),
            VoiceError::Spawn { .. } => ApiError::InternalServerError(e.to_string()),
            VoiceError::Stt(_) | VoiceError::NoSpeech | VoiceError::Tts(_) => {
                ApiError::Unprocessable(e.to_string())
            }
        }
    }
}

impl From<talkback_relay::RelayError> for ApiError {
    fn from(e: talkback_relay::RelayError) -> Self {
        match e {
            talkback_relay::RelayError::StoreUnavailable(_) => {
                ApiError::ServiceUnavailable(e.to_string())
            }
            talkback_relay::RelayError::Serialization(_) => {
                ApiError::InternalServerError(e.to_string())
            }
        }
    }
}

impl From<talkback_db::MessageStoreError> for ApiError {
    fn from(e: talkback_db::MessageStoreError) -> Self {
        ApiError::InternalServerError(e.to_string())
    }
}

impl From<r2d2::Error> for ApiError {
    fn from(e: r2d2::Error) -> Self {
        ApiError::InternalServerError(format!("db connection failed: {}", e))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::InternalServerError(format!("task failed: {}", e))
    }
}
