//! Error responses for the HTTP API.

use crate::forecast::ForecastError;
use crate::keys::KeyError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    InvalidFilters,
    InvalidKey,
    NotFound,
    UpstreamFailed,
}

impl ApiErrorCode {
    fn status(self) -> StatusCode {
        match self {
            ApiErrorCode::InvalidFilters | ApiErrorCode::InvalidKey => StatusCode::BAD_REQUEST,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::UpstreamFailed => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code.status(), Json(self)).into_response()
    }
}

impl From<ForecastError> for ApiError {
    fn from(err: ForecastError) -> Self {
        match err {
            ForecastError::InvalidFilters(reason) => {
                ApiError::new(ApiErrorCode::InvalidFilters, reason)
            }
            ForecastError::Upstream(reason) => {
                ApiError::new(ApiErrorCode::UpstreamFailed, "Forecast data is unavailable")
                    .with_details(Value::String(reason))
            }
        }
    }
}

impl From<KeyError> for ApiError {
    fn from(err: KeyError) -> Self {
        ApiError::new(ApiErrorCode::InvalidKey, err.to_string())
    }
}
