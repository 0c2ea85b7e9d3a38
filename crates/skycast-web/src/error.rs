//! API and startup errors.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use skycast_core::{CoreError, UpstreamError, ValidationError};
use thiserror::Error;

/// Response extension carrying the error message, for the request summary.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid body: {0}")]
    InvalidBody(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Too Many Requests (per-IP rate limit)")]
    RateLimited { limit: u32, retry_after_secs: u64 },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidQuery(_) | Self::InvalidBody(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Upstream(error) => {
                StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::InvalidQuery(_) | Self::InvalidBody(_) => "validation",
            Self::Upstream(error) => error.code(),
            Self::RateLimited { .. } => "rate_limited",
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::InvalidQuery(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.to_string();
        let body = Json(json!({ "detail": &detail, "code": self.code() }));

        let mut response = (status, body).into_response();
        if let Self::RateLimited {
            limit,
            retry_after_secs,
        } = self
        {
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        }
        response.extensions_mut().insert(ErrorDetail(detail));
        response
    }
}

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to load model from {path}: {source}")]
    Model { path: String, source: CoreError },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

impl StartupError {
    /// Process exit code for this error.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Model { .. } => 2,
            Self::Bind { .. } => 3,
            Self::Serve(_) => 1,
        }
    }
}
