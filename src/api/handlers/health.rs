//! Liveness handlers.

use axum::Json;
use serde_json::{Value, json};

/// GET / - Service banner.
pub async fn root() -> Json<Value> {
    Json(json!({
        "status": "Joy Girl relay",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "ai": "DeepSeek",
        "flow": "IR → Telegram → OLED"
    }))
}

/// GET /health - Health check endpoint.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}
