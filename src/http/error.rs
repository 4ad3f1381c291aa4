//! Uniform error-to-response mapping for the HTTP front, per spec.md
//! §4.1's failure modes (400/403/404/405/500) and §7's fixed
//! capability-denied string.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::auth::CAPABILITY_DENIED_MESSAGE;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    AuthFailed(String),
    Forbidden,
    NotFound(String),
    MethodNotAllowed,
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::AuthFailed(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, CAPABILITY_DENIED_MESSAGE.to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}
