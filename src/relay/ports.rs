//! Seams between the relay core and its upstreams.
//!
//! `TelegramClient`, `DeepSeekClient` and `WhisperClient` are the production
//! implementations; tests drive the core through in-memory fakes.

use async_trait::async_trait;

use crate::deepseek::{CompletionError, Message};
use crate::relay::telegram::{BotIdentity, SendError, WebhookError, WebhookRegistration};
use crate::transcription::TranscriptionError;

/// Outbound side of the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Send `text` to `chat_id`, returning the platform message id.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i32, SendError>;

    async fn set_webhook(&self, url: &str) -> Result<(), WebhookError>;

    /// Current registration. Falls back to the cached snapshot when the
    /// platform can't be reached.
    async fn get_webhook_info(&self) -> WebhookRegistration;

    async fn delete_webhook(&self) -> Result<(), WebhookError>;

    async fn bot_identity(&self) -> Result<BotIdentity, SendError>;

    /// Fetch the contents of an uploaded file, such as a voice note.
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, SendError>;
}

/// A chat-completion provider.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Complete `history` (oldest first) with the configured token limit.
    async fn complete(&self, history: &[Message]) -> Result<String, CompletionError>;

    async fn complete_with_limit(
        &self,
        history: &[Message],
        max_tokens: u32,
    ) -> Result<String, CompletionError>;
}

/// Speech-to-text for voice messages.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, TranscriptionError>;
}
