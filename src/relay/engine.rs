//! Relay core: replies to Telegram users and delivers device notifications.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::deepseek::Message;
use crate::relay::debounce::DebounceGate;
use crate::relay::mailbox::{Mailbox, MailboxEntry};
use crate::relay::message::{
    InboundUpdate, MessageBody, OutboundNotification, SourceTag, escape_html,
};
use crate::relay::ports::{ChatPlatform, CompletionBackend, Transcriber};
use crate::relay::retry::{RetryError, RetryPolicy, with_retry};
use crate::relay::session::SessionStore;
use crate::relay::telegram::{BotIdentity, SendError, WebhookError, WebhookRegistration};

pub const DEFAULT_FALLBACK_TEXT: &str = "Sorry, my brain glitched! Try again in a moment.";
pub const DEFAULT_GREETING: &str = "🌸 Hi! I'm Joy Girl! Wave your hand over the IR sensor to chat!";
/// Stands in for what the user said when a voice note can't be transcribed.
pub const DEFAULT_VOICE_FALLBACK: &str = "I couldn't hear clearly";
pub const VOICE_PROCESSING_TEXT: &str = "🎧 Processing voice...";
pub const UNSUPPORTED_MESSAGE_TEXT: &str = "🌸 I can only read text and voice messages for now!";

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Chat that receives device notifications.
    pub notify_chat_id: i64,
    /// Chats the bot answers. Empty means every chat.
    pub allowed_chats: HashSet<i64>,
    pub fallback_text: String,
    pub greeting_text: String,
    pub voice_fallback_text: String,
    pub debounce_window: Duration,
    pub chat_policy: RetryPolicy,
    pub llm_policy: RetryPolicy,
    pub voice_policy: RetryPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            notify_chat_id: 0,
            allowed_chats: HashSet::new(),
            fallback_text: DEFAULT_FALLBACK_TEXT.to_string(),
            greeting_text: DEFAULT_GREETING.to_string(),
            voice_fallback_text: DEFAULT_VOICE_FALLBACK.to_string(),
            debounce_window: Duration::from_secs(2),
            chat_policy: RetryPolicy::with_timeout(Duration::from_secs(10)),
            llm_policy: RetryPolicy::with_timeout(Duration::from_secs(20)),
            voice_policy: RetryPolicy::with_timeout(Duration::from_secs(60)),
        }
    }
}

/// Outcome of a notification request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryResult {
    Delivered { message_id: i32, at: DateTime<Utc> },
    /// Folded into a delivery made moments earlier.
    Coalesced,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeliveryError {
    /// Upstream kept failing with retryable errors.
    #[error("upstream unavailable: {0}")]
    TransientUpstream(String),
    #[error("upstream rejected the request: {0}")]
    PermanentUpstream(String),
}

impl<E: std::fmt::Display> From<RetryError<E>> for DeliveryError {
    fn from(e: RetryError<E>) -> Self {
        match e {
            RetryError::Exhausted { .. } => DeliveryError::TransientUpstream(e.to_string()),
            RetryError::Permanent(inner) => DeliveryError::PermanentUpstream(inner.to_string()),
        }
    }
}

/// What became of an inbound update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Replied { message_id: i32 },
    /// The model failed and the user got the fallback text.
    FallbackSent { message_id: i32 },
    Duplicate,
    Command,
    /// A message type the bot can't read; the user was told so.
    Unsupported,
    Ignored(&'static str),
    /// No reply could be delivered.
    SendFailed(String),
}

pub struct Relay {
    config: RelayConfig,
    platform: Arc<dyn ChatPlatform>,
    llm: Arc<dyn CompletionBackend>,
    transcriber: Option<Arc<dyn Transcriber>>,
    sessions: Arc<SessionStore>,
    debounce: DebounceGate<SourceTag>,
    mailbox: Mailbox,
}

impl Relay {
    pub fn new(
        config: RelayConfig,
        platform: Arc<dyn ChatPlatform>,
        llm: Arc<dyn CompletionBackend>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        let debounce = DebounceGate::new(config.debounce_window);
        Self {
            config,
            platform,
            llm,
            transcriber: None,
            sessions,
            debounce,
            mailbox: Mailbox::new(),
        }
    }

    /// Enable voice messages. Without a transcriber every voice note reads
    /// as the voice fallback text.
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    fn is_allowed(&self, chat_id: i64) -> bool {
        self.config.allowed_chats.is_empty() || self.config.allowed_chats.contains(&chat_id)
    }

    /// Answer one user message. Failures are logged, never returned.
    ///
    /// The chat's session lock is held throughout, so a redelivered update
    /// waits for the first copy and is then dropped as a duplicate.
    pub async fn handle_inbound_update(&self, update: InboundUpdate) -> UpdateOutcome {
        if !self.is_allowed(update.chat_id) {
            debug!("Ignoring update {} from chat {}", update.update_id, update.chat_id);
            return UpdateOutcome::Ignored("chat not allowed");
        }

        let session = self.sessions.session(update.chat_id).await;
        let mut session = session.lock().await;

        if !session.observe_update(update.update_id, update.sent_at) {
            info!("🔁 Duplicate update {} dropped", update.update_id);
            return UpdateOutcome::Duplicate;
        }

        if let Some(command) = update.command() {
            if command == "start" {
                info!("👋 Greeting chat {}", update.chat_id);
                if let Err(e) = self.send(update.chat_id, &self.config.greeting_text).await {
                    error!("Failed to greet chat {}: {e}", update.chat_id);
                }
            } else {
                debug!("Ignoring command /{command}");
            }
            return UpdateOutcome::Command;
        }

        let kind = update.body.kind();
        let text = match update.body {
            MessageBody::Text(text) => text,
            MessageBody::Voice { file_id, duration_secs } => {
                info!("🎤 Voice note ({duration_secs}s) in chat {}", update.chat_id);
                self.hear_voice(update.chat_id, &file_id).await
            }
            MessageBody::Unsupported => {
                debug!("Unsupported message in chat {}", update.chat_id);
                if let Err(e) = self.send(update.chat_id, UNSUPPORTED_MESSAGE_TEXT).await {
                    error!("Failed to answer chat {}: {e}", update.chat_id);
                }
                return UpdateOutcome::Unsupported;
            }
        };

        info!(
            "📨 {} in chat {}: {} chars",
            update.sender_name,
            update.chat_id,
            text.chars().count()
        );

        session.push_user(text.as_str());
        let history = session.history();

        let completion = with_retry(&self.config.llm_policy, "DeepSeek completion", || {
            self.llm.complete(&history)
        })
        .await;

        let (response, fell_back) = match completion {
            Ok(reply) => {
                session.push_assistant(reply.as_str());
                (reply, false)
            }
            Err(e) => {
                warn!("Completion failed for chat {}, sending fallback: {e}", update.chat_id);
                session.discard_unanswered();
                (self.config.fallback_text.clone(), true)
            }
        };

        let reply = format!("🌸 {}", escape_html(&response));

        // Mailbox first: the device sees the exchange even if the send fails
        self.mailbox
            .push(MailboxEntry {
                id: update.message_id,
                text,
                from_user: update.sender_name,
                timestamp: Utc::now(),
                response,
                kind: kind.to_string(),
            })
            .await;

        let sent = self.send(update.chat_id, &reply).await;

        match sent {
            Ok(message_id) if fell_back => UpdateOutcome::FallbackSent { message_id },
            Ok(message_id) => {
                info!("✅ Replied to chat {} (msg_id: {message_id})", update.chat_id);
                UpdateOutcome::Replied { message_id }
            }
            Err(e) => {
                error!("Failed to reply to chat {}: {e}", update.chat_id);
                UpdateOutcome::SendFailed(e.to_string())
            }
        }
    }

    /// Turn a voice note into text, keeping the user posted.
    ///
    /// Never fails: anything that goes wrong yields the voice fallback text.
    async fn hear_voice(&self, chat_id: i64, file_id: &str) -> String {
        if let Err(e) = self.send(chat_id, VOICE_PROCESSING_TEXT).await {
            warn!("Failed to acknowledge voice in chat {chat_id}: {e}");
        }

        let heard = match self.transcribe(file_id).await {
            Ok(text) => text,
            Err(e) => {
                warn!("🎧 Voice transcription failed for chat {chat_id}: {e}");
                self.config.voice_fallback_text.clone()
            }
        };

        let echo = format!("📝 You said: \"{}\"", escape_html(&heard));
        if let Err(e) = self.send(chat_id, &echo).await {
            warn!("Failed to echo transcript to chat {chat_id}: {e}");
        }
        heard
    }

    async fn transcribe(&self, file_id: &str) -> Result<String, String> {
        let Some(transcriber) = &self.transcriber else {
            return Err("no transcriber configured".to_string());
        };

        let audio = with_retry(&self.config.chat_policy, "Telegram getFile", || {
            self.platform.download_file(file_id)
        })
        .await
        .map_err(|e| e.to_string())?;

        with_retry(&self.config.voice_policy, "Transcription", || {
            transcriber.transcribe(&audio)
        })
        .await
        .map_err(|e| e.to_string())
    }

    /// Run `handle_inbound_update` in the background and log if it panics.
    pub fn spawn_update(self: Arc<Self>, update: InboundUpdate) -> JoinHandle<()> {
        let update_id = update.update_id;
        let task = tokio::spawn(async move { self.handle_inbound_update(update).await });
        tokio::spawn(async move {
            if let Err(e) = task.await
                && e.is_panic()
            {
                error!("💥 Reply task for update {update_id} panicked: {e}");
            }
        })
    }

    /// Deliver a device notification to the configured chat.
    pub async fn handle_notification_request(
        &self,
        note: OutboundNotification,
    ) -> Result<DeliveryResult, DeliveryError> {
        let Some(stamp) = self.debounce.try_acquire(note.source).await else {
            info!("⏳ Notification from {} coalesced", note.source);
            return Ok(DeliveryResult::Coalesced);
        };

        match self.send(self.config.notify_chat_id, &note.text).await {
            Ok(message_id) => {
                info!("🔔 Notification from {} delivered (msg_id: {message_id})", note.source);
                self.mailbox.set_waiting().await;
                Ok(DeliveryResult::Delivered {
                    message_id,
                    at: Utc::now(),
                })
            }
            Err(e) => {
                self.debounce.release(note.source, stamp).await;
                Err(e.into())
            }
        }
    }

    /// One-shot completion outside any chat session.
    ///
    /// Never fails: a failed completion yields the fallback text.
    pub async fn chat(&self, prompt: &str, max_tokens: Option<u32>) -> String {
        let history = [Message::user(prompt)];
        let history = &history[..];
        let llm = &self.llm;
        let completion = with_retry(&self.config.llm_policy, "DeepSeek chat", move || async move {
            match max_tokens {
                Some(limit) => llm.complete_with_limit(history, limit).await,
                None => llm.complete(history).await,
            }
        })
        .await;

        completion.unwrap_or_else(|e| {
            warn!("Direct chat failed, using fallback: {e}");
            self.config.fallback_text.clone()
        })
    }

    pub async fn register_webhook(&self, url: &str) -> Result<(), RetryError<WebhookError>> {
        with_retry(&self.config.chat_policy, "Telegram setWebhook", || {
            self.platform.set_webhook(url)
        })
        .await
    }

    pub async fn remove_webhook(&self) -> Result<(), RetryError<WebhookError>> {
        with_retry(&self.config.chat_policy, "Telegram deleteWebhook", || {
            self.platform.delete_webhook()
        })
        .await
    }

    pub async fn webhook_info(&self) -> WebhookRegistration {
        self.platform.get_webhook_info().await
    }

    pub async fn bot_identity(&self) -> Result<BotIdentity, RetryError<SendError>> {
        with_retry(&self.config.chat_policy, "Telegram getMe", || {
            self.platform.bot_identity()
        })
        .await
    }

    async fn send(&self, chat_id: i64, text: &str) -> Result<i32, RetryError<SendError>> {
        with_retry(&self.config.chat_policy, "Telegram sendMessage", || {
            self.platform.send_message(chat_id, text)
        })
        .await
    }
}
