use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::deepseek::{CompletionSettings, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::relay::engine::{
    DEFAULT_FALLBACK_TEXT, DEFAULT_GREETING, DEFAULT_VOICE_FALLBACK, RelayConfig,
};
use crate::relay::retry::RetryPolicy;
use crate::transcription::{DEFAULT_TRANSCRIPTION_MODEL, DEFAULT_TRANSCRIPTION_URL};

/// Personality sent as the system prompt unless overridden.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Joy Girl, a cheerful, friendly AI assistant.
You live in a cute ESP32 device with a tiny OLED screen.
Keep responses SHORT (under 40 words) - the screen is small!
Be enthusiastic and helpful. Use emojis sometimes.";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("failed to read env file '{}': {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm_api_key: String,
    pub bot_token: String,
    /// Recipient of device notifications.
    pub chat_id: i64,
    /// Chats the bot answers. Empty means every chat.
    pub allowed_chat_ids: HashSet<i64>,
    pub llm_model: String,
    pub llm_base_url: String,
    pub llm_max_tokens: u32,
    pub llm_temperature: f32,
    pub system_prompt: String,
    pub fallback_text: String,
    /// Bound on each Telegram call.
    pub chat_timeout: Duration,
    /// Bound on each completion call.
    pub llm_timeout: Duration,
    pub debounce: Duration,
    pub history_turns: usize,
    /// Voice notes are transcribed only when this is set.
    pub transcription_api_key: Option<String>,
    pub transcription_base_url: String,
    pub transcription_model: String,
    pub transcription_timeout: Duration,
    pub voice_fallback_text: String,
    /// Bearer token the device and admin endpoints require, when set.
    pub relay_token: Option<String>,
    /// Shared secret Telegram echoes on every webhook delivery.
    pub webhook_secret: Option<String>,
    pub host: String,
    pub port: u16,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from a dotenv-style file, ignoring the process environment.
    pub fn from_env_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let read_err = |source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        };
        let vars = dotenvy::from_path_iter(path)
            .map_err(read_err)?
            .collect::<Result<HashMap<String, String>, _>>()
            .map_err(read_err)?;
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Load from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let either = |key: &str, alias: &str| get(key).or_else(|| get(alias));

        let llm_api_key = either("LLM_API_KEY", "DEEPSEEK_API_KEY").ok_or(ConfigError::Missing("LLM_API_KEY"))?;

        let bot_token = either("BOT_TOKEN", "TELEGRAM_BOT_TOKEN").ok_or(ConfigError::Missing("BOT_TOKEN"))?;
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Invalid {
                key: "BOT_TOKEN",
                reason: "expected format 123456789:ABCdefGHI...".into(),
            });
        }

        let chat_id = either("CHAT_ID", "TELEGRAM_CHAT_ID")
            .ok_or(ConfigError::Missing("CHAT_ID"))
            .and_then(|v| parse("CHAT_ID", &v))?;

        let allowed_chat_ids = match get("ALLOWED_CHAT_IDS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse("ALLOWED_CHAT_IDS", s))
                .collect::<Result<HashSet<i64>, _>>()?,
            None => HashSet::new(),
        };

        let llm_max_tokens: u32 = optional(&get, "LLM_MAX_TOKENS", 60)?;
        if llm_max_tokens == 0 {
            return Err(invalid("LLM_MAX_TOKENS", "must be positive"));
        }

        let llm_temperature: f32 = optional(&get, "LLM_TEMPERATURE", 0.7)?;
        if !(0.0..=2.0).contains(&llm_temperature) {
            return Err(invalid("LLM_TEMPERATURE", "must be between 0 and 2"));
        }

        let chat_timeout = seconds(&get, "CHAT_TIMEOUT_SECS", 10)?;
        let llm_timeout = seconds(&get, "LLM_TIMEOUT_SECS", 20)?;
        let debounce = Duration::from_millis(optional(&get, "DEBOUNCE_MS", 2000)?);
        let transcription_timeout = seconds(&get, "TRANSCRIPTION_TIMEOUT_SECS", 60)?;

        let history_turns: usize = optional(&get, "HISTORY_TURNS", 10)?;
        if history_turns == 0 {
            return Err(invalid("HISTORY_TURNS", "must be positive"));
        }

        let webhook_secret = get("WEBHOOK_SECRET");
        if let Some(ref secret) = webhook_secret
            && (secret.len() > 256
                || !secret.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        {
            return Err(invalid(
                "WEBHOOK_SECRET",
                "must be 1-256 characters of A-Z, a-z, 0-9, _ and -",
            ));
        }

        Ok(Self {
            llm_api_key,
            bot_token,
            chat_id,
            allowed_chat_ids,
            llm_model: either("LLM_MODEL", "DEEPSEEK_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            llm_base_url: get("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            llm_max_tokens,
            llm_temperature,
            system_prompt: get("SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            fallback_text: get("FALLBACK_TEXT").unwrap_or_else(|| DEFAULT_FALLBACK_TEXT.to_string()),
            chat_timeout,
            llm_timeout,
            debounce,
            history_turns,
            transcription_api_key: either("TRANSCRIPTION_API_KEY", "OPENAI_API_KEY"),
            transcription_base_url: get("TRANSCRIPTION_BASE_URL")
                .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_URL.to_string()),
            transcription_model: get("TRANSCRIPTION_MODEL")
                .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            transcription_timeout,
            voice_fallback_text: get("VOICE_FALLBACK_TEXT")
                .unwrap_or_else(|| DEFAULT_VOICE_FALLBACK.to_string()),
            relay_token: get("RELAY_TOKEN"),
            webhook_secret,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: optional(&get, "PORT", 10000)?,
            log_dir: get("LOG_DIR").map(PathBuf::from),
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| invalid("HOST", &format!("{e}")))
    }

    pub fn completion_settings(&self) -> CompletionSettings {
        CompletionSettings {
            model: self.llm_model.clone(),
            max_tokens: self.llm_max_tokens,
            temperature: self.llm_temperature,
            system_prompt: Some(self.system_prompt.clone()),
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            notify_chat_id: self.chat_id,
            allowed_chats: self.allowed_chat_ids.clone(),
            fallback_text: self.fallback_text.clone(),
            greeting_text: DEFAULT_GREETING.to_string(),
            voice_fallback_text: self.voice_fallback_text.clone(),
            debounce_window: self.debounce,
            chat_policy: RetryPolicy::with_timeout(self.chat_timeout),
            llm_policy: RetryPolicy::with_timeout(self.llm_timeout),
            voice_policy: RetryPolicy::with_timeout(self.transcription_timeout),
        }
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| invalid(key, &format!("'{value}': {e}")))
}

fn optional<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get(key).map_or(Ok(default), |v| parse(key, &v))
}

fn seconds<G>(get: &G, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let secs: u64 = optional(get, key, default)?;
    if secs == 0 {
        return Err(invalid(key, "must be positive"));
    }
    Ok(Duration::from_secs(secs))
}
