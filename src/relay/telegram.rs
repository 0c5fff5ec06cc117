//! Telegram client using teloxide.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, ParseMode};
use teloxide::{ApiError, RequestError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::relay::ports::ChatPlatform;
use crate::relay::retry::Transient;

/// Telegram descriptions that mean the API itself was unavailable.
const SERVER_ERROR_DESCRIPTIONS: &[&str] = &[
    "Internal Server Error",
    "Bad Gateway",
    "Service Unavailable",
    "Gateway Timeout",
];

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SendError {
    #[error("rate limited by Telegram (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Telegram rejected the bot token")]
    AuthFailure,
    #[error("network failure: {0}")]
    NetworkFailure(String),
    #[error("Telegram error: {0}")]
    Unknown(String),
}

impl Transient for SendError {
    fn is_transient(&self) -> bool {
        matches!(self, SendError::RateLimited { .. } | SendError::NetworkFailure(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            SendError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    fn timed_out(after: Duration) -> Self {
        SendError::NetworkFailure(format!("timed out after {after:?}"))
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum WebhookError {
    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Platform(#[from] SendError),
}

impl Transient for WebhookError {
    fn is_transient(&self) -> bool {
        match self {
            WebhookError::InvalidUrl(_) => false,
            WebhookError::Platform(e) => e.is_transient(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            WebhookError::InvalidUrl(_) => None,
            WebhookError::Platform(e) => e.retry_after(),
        }
    }

    fn timed_out(after: Duration) -> Self {
        WebhookError::Platform(SendError::timed_out(after))
    }
}

/// Outcome of the last time we talked to Telegram about the webhook.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    #[default]
    Unverified,
    Verified { at: DateTime<Utc> },
    Failed { at: DateTime<Utc>, error: String },
}

/// Snapshot of the webhook registered on Telegram's side.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WebhookRegistration {
    pub url: Option<String>,
    /// Only known when this process did the registration.
    pub registered_at: Option<DateTime<Utc>>,
    pub pending_update_count: u32,
    /// Delivery error Telegram reports for the webhook.
    pub last_error: Option<String>,
    pub verification: Verification,
}

impl WebhookRegistration {
    /// True when `url` is registered and was confirmed by the platform.
    pub fn is_registered(&self, url: &str) -> bool {
        self.url.as_deref() == Some(url)
            && matches!(self.verification, Verification::Verified { .. })
    }

    pub fn record_set(&mut self, url: &str, now: DateTime<Utc>) {
        self.url = Some(url.to_string());
        self.registered_at = Some(now);
        self.last_error = None;
        self.verification = Verification::Verified { at: now };
    }

    pub fn record_deleted(&mut self, now: DateTime<Utc>) {
        self.url = None;
        self.registered_at = None;
        self.pending_update_count = 0;
        self.last_error = None;
        self.verification = Verification::Verified { at: now };
    }

    pub fn record_info(
        &mut self,
        url: Option<String>,
        pending_update_count: u32,
        last_error: Option<String>,
        now: DateTime<Utc>,
    ) {
        if url != self.url {
            self.registered_at = None;
        }
        self.url = url;
        self.pending_update_count = pending_update_count;
        self.last_error = last_error;
        self.verification = Verification::Verified { at: now };
    }

    pub fn record_failure(&mut self, error: String, now: DateTime<Utc>) {
        self.verification = Verification::Failed { at: now, error };
    }
}

/// Who the bot is, per `getMe`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotIdentity {
    pub id: u64,
    pub username: String,
    pub first_name: String,
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
    webhook_secret: Option<String>,
    registration: Mutex<WebhookRegistration>,
}

impl TelegramClient {
    /// Client whose every API call is bounded by `timeout`.
    pub fn new(
        token: &str,
        timeout: Duration,
        webhook_secret: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(timeout)
            .build()?;
        Ok(Self::with_bot(Bot::with_client(token, client), webhook_secret))
    }

    pub fn with_bot(bot: Bot, webhook_secret: Option<String>) -> Self {
        Self {
            bot,
            webhook_secret,
            registration: Mutex::new(WebhookRegistration::default()),
        }
    }

    /// Point the client at a different Bot API server.
    pub fn with_api_url(mut self, url: Url) -> Self {
        self.bot = self.bot.set_api_url(url);
        self
    }

    pub async fn cached_registration(&self) -> WebhookRegistration {
        self.registration.lock().await.clone()
    }
}

#[async_trait]
impl ChatPlatform for TelegramClient {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i32, SendError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .await
            .map(|msg| msg.id.0)
            .map_err(|e| {
                let err = map_request_error(e);
                warn!("Failed to send to chat {chat_id}: {err}");
                err
            })
    }

    async fn set_webhook(&self, url: &str) -> Result<(), WebhookError> {
        let parsed = Url::parse(url).map_err(|e| WebhookError::InvalidUrl(format!("{url}: {e}")))?;
        if parsed.scheme() != "https" {
            return Err(WebhookError::InvalidUrl(format!("{url}: Telegram requires https")));
        }

        // Held across the call so concurrent registrations of the same URL
        // produce a single platform request.
        let mut registration = self.registration.lock().await;
        if registration.is_registered(parsed.as_str()) {
            debug!("Webhook already registered at {parsed}");
            return Ok(());
        }

        let mut request = self.bot.set_webhook(parsed.clone());
        if let Some(ref secret) = self.webhook_secret {
            request = request.secret_token(secret.clone());
        }

        match request.await {
            Ok(_) => {
                info!("🔗 Webhook set to {parsed}");
                registration.record_set(parsed.as_str(), Utc::now());
                Ok(())
            }
            Err(e) => {
                let err = map_request_error(e);
                warn!("Failed to set webhook: {err}");
                registration.record_failure(err.to_string(), Utc::now());
                Err(err.into())
            }
        }
    }

    async fn get_webhook_info(&self) -> WebhookRegistration {
        let mut registration = self.registration.lock().await;
        match self.bot.get_webhook_info().await {
            Ok(info) => registration.record_info(
                info.url.map(|u| u.to_string()),
                info.pending_update_count,
                info.last_error_message,
                Utc::now(),
            ),
            Err(e) => {
                let err = map_request_error(e);
                warn!("Failed to query webhook: {err}");
                registration.record_failure(err.to_string(), Utc::now());
            }
        }
        registration.clone()
    }

    async fn delete_webhook(&self) -> Result<(), WebhookError> {
        let mut registration = self.registration.lock().await;
        match self.bot.delete_webhook().await {
            Ok(_) => {
                info!("🗑️ Webhook deleted");
                registration.record_deleted(Utc::now());
                Ok(())
            }
            Err(e) => {
                let err = map_request_error(e);
                warn!("Failed to delete webhook: {err}");
                registration.record_failure(err.to_string(), Utc::now());
                Err(err.into())
            }
        }
    }

    async fn bot_identity(&self) -> Result<BotIdentity, SendError> {
        let me = self.bot.get_me().await.map_err(map_request_error)?;
        Ok(BotIdentity {
            id: me.user.id.0,
            username: me.username().to_string(),
            first_name: me.user.first_name.clone(),
        })
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, SendError> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(map_request_error)?;

        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(|e| SendError::NetworkFailure(format!("download failed: {e}")))?;

        debug!("Downloaded {} ({} bytes)", file.path, data.len());
        Ok(data)
    }
}

/// Sort a teloxide failure into the relay's send taxonomy.
pub fn map_request_error(e: RequestError) -> SendError {
    match e {
        RequestError::RetryAfter(wait) => SendError::RateLimited {
            retry_after: Some(wait.duration()),
        },
        RequestError::Api(ApiError::InvalidToken) => SendError::AuthFailure,
        RequestError::Api(ApiError::Unknown(description))
            if SERVER_ERROR_DESCRIPTIONS
                .iter()
                .any(|d| description.contains(d)) =>
        {
            SendError::NetworkFailure(description)
        }
        // Gateways in front of the Bot API answer 5xx with HTML pages
        RequestError::InvalidJson { raw, .. } if !is_bot_api_response(&raw) => {
            let snippet: String = raw.chars().take(80).collect();
            SendError::NetworkFailure(format!("non-API response: {snippet}"))
        }
        RequestError::Network(e) => SendError::NetworkFailure(e.to_string()),
        RequestError::Io(e) => SendError::NetworkFailure(e.to_string()),
        other => SendError::Unknown(other.to_string()),
    }
}

/// True when `raw` is a Bot API envelope, i.e. JSON carrying an `ok` field.
fn is_bot_api_response(raw: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(raw)
        .is_ok_and(|v| v.get("ok").is_some_and(serde_json::Value::is_boolean))
}
