//! Mapping of domain errors onto HTTP responses.

use crate::error::Error;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

const INTERNAL_SERVER_ERROR: &str = "Internal Server Error";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal {
        error: Error,
        /// Include the error detail as `trace`
        expose: bool,
    },
}

impl ApiError {
    pub fn from_error(error: Error, expose: bool) -> Self {
        match error {
            Error::ValidationError(msg) => ApiError::BadRequest(msg),
            error => ApiError::Internal { error, expose },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::Internal { error, expose } => {
                tracing::error!(code = %error.code(), "Request failed: {}", error);
                let mut body = json!({
                    "error": INTERNAL_SERVER_ERROR,
                    "code": error.code(),
                });
                if expose {
                    body["trace"] = json!(format!("{error:?}"));
                }
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
