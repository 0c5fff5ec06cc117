//! Shared-secret checks for inbound requests.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use super::error::ApiError;
use super::state::AppState;

/// Header Telegram uses to echo the webhook's `secret_token`.
pub const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Middleware guarding the device and admin routes.
pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(ref expected) = state.relay_token {
        let provided = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !verify_bearer_token(expected, provided) {
            warn!("Rejected {} {}: bad bearer token", request.method(), request.uri().path());
            return Err(ApiError::Unauthorized);
        }
    }
    Ok(next.run(request).await)
}

/// Check the webhook secret header when one is configured.
pub fn verify_webhook_secret(expected: Option<&str>, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let provided = headers
        .get(TELEGRAM_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        warn!("Rejected webhook delivery: bad secret token");
        Err(ApiError::Unauthorized)
    }
}

pub fn verify_bearer_token(expected: &str, provided: &str) -> bool {
    match provided.strip_prefix("Bearer ") {
        Some(token) => constant_time_eq(expected.as_bytes(), token.as_bytes()),
        None => false,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
