//! API error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::relay::engine::DeliveryError;
use crate::relay::message::MalformedInput;
use crate::relay::retry::RetryError;
use crate::relay::telegram::{SendError, WebhookError};

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    /// Upstream refused the request; retrying will not help.
    #[error("upstream error: {0}")]
    BadGateway(String),

    /// Upstream kept failing; the caller may retry later.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "ok": false,
            "error": self.to_string()
        }));
        (status, body).into_response()
    }
}

impl From<MalformedInput> for ApiError {
    fn from(err: MalformedInput) -> Self {
        ApiError::BadRequest(err.0)
    }
}

impl From<DeliveryError> for ApiError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::TransientUpstream(msg) => ApiError::ServiceUnavailable(msg),
            DeliveryError::PermanentUpstream(msg) => ApiError::BadGateway(msg),
        }
    }
}

impl From<RetryError<SendError>> for ApiError {
    fn from(err: RetryError<SendError>) -> Self {
        DeliveryError::from(err).into()
    }
}

impl From<RetryError<WebhookError>> for ApiError {
    fn from(err: RetryError<WebhookError>) -> Self {
        match err {
            RetryError::Permanent(WebhookError::InvalidUrl(msg)) => ApiError::BadRequest(msg),
            other => DeliveryError::from(other).into(),
        }
    }
}
