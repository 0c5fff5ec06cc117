//! One-shot chat for the device, outside any Telegram conversation.

use axum::{Json, body::Bytes, extract::State};
use serde::Deserialize;
use serde_json::{Value, json};

use super::parse_json;
use crate::api::error::{ApiError, Result};
use crate::api::state::AppState;
use crate::relay::mailbox::{OLED_CHUNK_SIZE, chunk_text};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    fn validate(self) -> Result<Self> {
        if self.message.trim().is_empty() {
            return Err(ApiError::BadRequest("message must not be empty".into()));
        }
        if self.max_tokens == Some(0) {
            return Err(ApiError::BadRequest("max_tokens must be positive".into()));
        }
        Ok(self)
    }
}

/// POST /chat
pub async fn chat(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    let request = parse_json::<ChatRequest>(&body, "chat body")?.validate()?;
    let response = state.relay.chat(&request.message, request.max_tokens).await;
    Ok(Json(json!({ "response": response })))
}

/// POST /chat/esp32 - Same as `/chat`, split for the OLED screen.
pub async fn chat_esp32(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    let request = parse_json::<ChatRequest>(&body, "chat body")?.validate()?;
    let response = state.relay.chat(&request.message, request.max_tokens).await;
    let chunks = chunk_text(&response, OLED_CHUNK_SIZE);
    Ok(Json(json!({
        "total_chunks": chunks.len(),
        "chunks": chunks,
        "full_text": response,
    })))
}
