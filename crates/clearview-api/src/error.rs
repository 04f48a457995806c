//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::signature::SignatureError;

/// Handler error rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    Database(clearview_core::Error),
    Unauthorized(String),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl From<clearview_core::Error> for ApiError {
    fn from(err: clearview_core::Error) -> Self {
        use clearview_core::Error;
        match &err {
            Error::NotFound(msg) => ApiError::NotFound(msg.clone()),
            Error::CallNotFound(_) | Error::PatientNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            Error::InvalidInput(msg) => ApiError::BadRequest(msg.clone()),
            _ => ApiError::Database(err),
        }
    }
}

impl From<SignatureError> for ApiError {
    fn from(err: SignatureError) -> Self {
        ApiError::Unauthorized(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Database(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
