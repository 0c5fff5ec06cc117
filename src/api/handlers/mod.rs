//! HTTP request handlers.

mod chat;
mod health;
mod messages;
mod telegram;

pub use chat::{chat, chat_esp32};
pub use health::{health, root};
pub use messages::{clear_messages, latest_message, list_messages};
pub use telegram::{bot_info, delete_webhook, notify, set_webhook, telegram_webhook, webhook_info};

use serde::de::DeserializeOwned;

use super::error::ApiError;

/// Decode a JSON body, mapping any failure to 400.
fn parse_json<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("{what}: {e}")))
}
