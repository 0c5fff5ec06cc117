//! DeepSeek chat-completion client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::relay::ports::CompletionBackend;
use crate::relay::retry::Transient;

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const DEFAULT_MODEL: &str = "deepseek-chat";

/// Max chars of an error body kept in logs and error values.
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Errors from a completion call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompletionError {
    /// Out of credit (402) or rate limited (429).
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
    #[error("authentication rejected by provider")]
    AuthFailure,
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
    /// 5xx or connection failure.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// Any other 4xx.
    #[error("request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
}

impl Transient for CompletionError {
    fn is_transient(&self) -> bool {
        matches!(self, CompletionError::Timeout(_) | CompletionError::Unavailable(_))
    }

    fn timed_out(after: Duration) -> Self {
        CompletionError::Timeout(after)
    }
}

/// Sampling settings applied to every request.
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system_prompt: Option<String>,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 60,
            temperature: 0.7,
            system_prompt: None,
        }
    }
}

pub struct DeepSeekClient {
    api_key: String,
    base_url: String,
    settings: CompletionSettings,
    http: reqwest::Client,
    timeout: Duration,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl DeepSeekClient {
    pub fn new(
        api_key: String,
        base_url: impl Into<String>,
        settings: CompletionSettings,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            settings,
            http,
            timeout,
        })
    }

    fn build_request<'a>(&'a self, history: &'a [Message], max_tokens: u32) -> ApiRequest<'a> {
        let system = self.settings.system_prompt.as_deref().map(|s| ApiMessage {
            role: Role::System.as_str(),
            content: s,
        });

        let messages = system
            .into_iter()
            .chain(history.iter().map(|m| ApiMessage {
                role: m.role.as_str(),
                content: &m.content,
            }))
            .collect();

        ApiRequest {
            model: &self.settings.model,
            messages,
            max_tokens,
            temperature: self.settings.temperature,
        }
    }

    pub async fn request_completion(
        &self,
        history: &[Message],
        max_tokens: u32,
    ) -> Result<String, CompletionError> {
        let request = self.build_request(history, max_tokens);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        debug!("DeepSeek response status: {status}");

        if !status.is_success() {
            let err = classify_status(status.as_u16(), &body);
            warn!("DeepSeek error: {err}");
            return Err(err);
        }

        extract_completion(&body)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> CompletionError {
        if e.is_timeout() {
            CompletionError::Timeout(self.timeout)
        } else {
            CompletionError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl CompletionBackend for DeepSeekClient {
    async fn complete(&self, history: &[Message]) -> Result<String, CompletionError> {
        self.request_completion(history, self.settings.max_tokens).await
    }

    async fn complete_with_limit(
        &self,
        history: &[Message],
        max_tokens: u32,
    ) -> Result<String, CompletionError> {
        self.request_completion(history, max_tokens).await
    }
}

/// Map a non-success HTTP status to a completion error.
pub fn classify_status(status: u16, body: &str) -> CompletionError {
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
    match status {
        401 | 403 => CompletionError::AuthFailure,
        402 | 429 => CompletionError::QuotaExceeded(body),
        500..=599 => CompletionError::Unavailable(format!("HTTP {status}: {body}")),
        _ => CompletionError::Rejected { status, body },
    }
}

/// Pull the top completion text out of a response body.
pub fn extract_completion(body: &str) -> Result<String, CompletionError> {
    let parsed: ApiResponse = serde_json::from_str(body)
        .map_err(|e| CompletionError::MalformedResponse(format!("invalid JSON: {e}")))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CompletionError::MalformedResponse("no choices".into()))?;

    match choice.message.content.map(|c| c.trim().to_string()) {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(CompletionError::MalformedResponse("empty completion".into())),
    }
}
