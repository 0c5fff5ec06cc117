//! WhisperClient against a local transcription endpoint.

mod common;

use std::time::Duration;

use axum::http::StatusCode;

use common::MockWhisper;
use joyrelay::relay::Transcriber;
use joyrelay::relay::retry::Transient;
use joyrelay::transcription::TranscriptionError;

#[tokio::test]
async fn test_voice_note_is_uploaded_as_ogg() {
    let mock = MockWhisper::start().await;
    let client = mock.client(Duration::from_secs(5));

    let text = client.transcribe(b"turn on the lights").await.unwrap();

    assert_eq!(text, "turn on the lights");
    let uploads = mock.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].authorization.as_deref(), Some("Bearer sk-whisper"));
    assert_eq!(uploads[0].model.as_deref(), Some("whisper-1"));
    assert_eq!(uploads[0].file_name.as_deref(), Some("voice.ogg"));
    assert_eq!(uploads[0].content_type.as_deref(), Some("audio/ogg"));
}

#[tokio::test]
async fn test_rejected_key_is_permanent() {
    let mock = MockWhisper::start().await;
    mock.script(StatusCode::UNAUTHORIZED, r#"{"error":{"message":"Incorrect API key"}}"#);
    let client = mock.client(Duration::from_secs(5));

    let err = client.transcribe(b"hello").await.unwrap_err();
    assert_eq!(err, TranscriptionError::AuthFailure);
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_overloaded_service_is_transient() {
    let mock = MockWhisper::start().await;
    mock.script(StatusCode::SERVICE_UNAVAILABLE, "overloaded");
    let client = mock.client(Duration::from_secs(5));

    let err = client.transcribe(b"hello").await.unwrap_err();
    assert!(matches!(err, TranscriptionError::Unavailable(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_silence_is_empty() {
    let mock = MockWhisper::start().await;
    mock.script(StatusCode::OK, r#"{"text": "   "}"#);
    let client = mock.client(Duration::from_secs(5));

    assert_eq!(client.transcribe(b"").await, Err(TranscriptionError::Empty));
}
