//! Speech-to-text through an OpenAI-compatible `audio/transcriptions` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::relay::ports::Transcriber;
use crate::relay::retry::Transient;

pub const DEFAULT_TRANSCRIPTION_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TranscriptionError {
    #[error("transcription timed out after {0:?}")]
    Timeout(Duration),
    #[error("transcription key rejected")]
    AuthFailure,
    /// 429, 5xx or connection failure.
    #[error("transcription service unavailable: {0}")]
    Unavailable(String),
    #[error("transcription rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed transcription response: {0}")]
    MalformedResponse(String),
    #[error("nothing was heard")]
    Empty,
}

impl Transient for TranscriptionError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            TranscriptionError::Timeout(_) | TranscriptionError::Unavailable(_)
        )
    }

    fn timed_out(after: Duration) -> Self {
        TranscriptionError::Timeout(after)
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: Option<String>,
}

/// Whisper-style transcription client. Telegram voice notes are OGG/Opus.
pub struct WhisperClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl WhisperClient {
    pub fn new(
        api_key: String,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http,
            timeout,
        })
    }

    pub async fn request_transcription(&self, audio: &[u8]) -> Result<String, TranscriptionError> {
        let file = Part::bytes(audio.to_vec())
            .file_name("voice.ogg")
            .mime_str("audio/ogg")
            .map_err(|e| TranscriptionError::Rejected {
                status: 0,
                body: format!("multipart error: {e}"),
            })?;
        let form = Form::new().text("model", self.model.clone()).part("file", file);

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        debug!("Transcription response status: {status} ({} audio bytes)", audio.len());

        if !status.is_success() {
            let err = classify_status(status.as_u16(), &body);
            warn!("Transcription error: {err}");
            return Err(err);
        }

        extract_transcript(&body)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> TranscriptionError {
        if e.is_timeout() {
            TranscriptionError::Timeout(self.timeout)
        } else {
            TranscriptionError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl Transcriber for WhisperClient {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, TranscriptionError> {
        self.request_transcription(audio).await
    }
}

pub fn classify_status(status: u16, body: &str) -> TranscriptionError {
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
    match status {
        401 | 403 => TranscriptionError::AuthFailure,
        429 | 500..=599 => TranscriptionError::Unavailable(format!("HTTP {status}: {body}")),
        _ => TranscriptionError::Rejected { status, body },
    }
}

pub fn extract_transcript(body: &str) -> Result<String, TranscriptionError> {
    let parsed: TranscriptionResponse = serde_json::from_str(body)
        .map_err(|e| TranscriptionError::MalformedResponse(format!("invalid JSON: {e}")))?;

    match parsed.text.map(|t| t.trim().to_string()) {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(TranscriptionError::Empty),
    }
}
