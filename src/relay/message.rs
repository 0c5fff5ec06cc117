//! Values crossing the ingress boundary.
//!
//! Webhook payloads are decoded into `InboundUpdate`, device requests into
//! `OutboundNotification`. Anything that fails to decode is a
//! `MalformedInput` and never reaches the relay core.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Telegram's limit on message text.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Sent when the device triggers without a message of its own.
pub const DEFAULT_NOTIFICATION: &str = "🌸 <b>Joy Girl detected you!</b>

Reply to this message to chat!

💡 Your message will appear on Joy Girl's OLED screen!";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed input: {0}")]
pub struct MalformedInput(pub String);

/// A user message extracted from a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundUpdate {
    pub update_id: i64,
    pub chat_id: i64,
    pub sender_id: Option<i64>,
    pub sender_name: String,
    pub message_id: i64,
    pub body: MessageBody,
    pub sent_at: DateTime<Utc>,
}

/// What the user sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Voice { file_id: String, duration_secs: u32 },
    /// Photos, stickers, documents and the like.
    Unsupported,
}

impl MessageBody {
    /// Mailbox `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::Text(_) => "text",
            MessageBody::Voice { .. } => "voice",
            MessageBody::Unsupported => "unsupported",
        }
    }
}

impl InboundUpdate {
    /// The bot command this message starts with, without arguments or `@botname`.
    pub fn command(&self) -> Option<&str> {
        let MessageBody::Text(text) = &self.body else {
            return None;
        };
        let first = text.strip_prefix('/')?.split_whitespace().next()?;
        Some(first.split('@').next().unwrap_or(first))
    }
}

/// Result of decoding a webhook payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedUpdate {
    Message(InboundUpdate),
    /// Well-formed, but not a new message (edits, membership changes...).
    Ignored { update_id: i64, reason: &'static str },
}

#[derive(Deserialize)]
struct RawUpdate {
    update_id: i64,
    message: Option<RawMessage>,
}

#[derive(Deserialize)]
struct RawMessage {
    message_id: i64,
    date: Option<i64>,
    chat: RawChat,
    from: Option<RawUser>,
    text: Option<String>,
    voice: Option<RawVoice>,
}

#[derive(Deserialize)]
struct RawVoice {
    file_id: String,
    #[serde(default)]
    duration: u32,
}

#[derive(Deserialize)]
struct RawChat {
    id: i64,
}

#[derive(Deserialize)]
struct RawUser {
    id: i64,
    first_name: Option<String>,
    username: Option<String>,
}

/// Decode a Telegram update delivered to the webhook.
pub fn parse_update(body: &[u8]) -> Result<ParsedUpdate, MalformedInput> {
    let raw: RawUpdate =
        serde_json::from_slice(body).map_err(|e| MalformedInput(format!("update: {e}")))?;

    let Some(message) = raw.message else {
        return Ok(ParsedUpdate::Ignored {
            update_id: raw.update_id,
            reason: "no message",
        });
    };

    let body = match (message.text.filter(|t| !t.trim().is_empty()), message.voice) {
        (Some(text), _) => MessageBody::Text(text),
        (None, Some(voice)) => MessageBody::Voice {
            file_id: voice.file_id,
            duration_secs: voice.duration,
        },
        (None, None) => MessageBody::Unsupported,
    };

    let sender_name = message
        .from
        .as_ref()
        .and_then(|u| u.first_name.clone().or_else(|| u.username.clone()))
        .unwrap_or_else(|| "User".to_string());

    let sent_at = message
        .date
        .and_then(|d| Utc.timestamp_opt(d, 0).single())
        .unwrap_or_else(Utc::now);

    Ok(ParsedUpdate::Message(InboundUpdate {
        update_id: raw.update_id,
        chat_id: message.chat.id,
        sender_id: message.from.map(|u| u.id),
        sender_name,
        message_id: message.message_id,
        body,
        sent_at,
    }))
}

/// Who asked for a notification. Debouncing is per tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    #[default]
    Device,
    Manual,
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceTag::Device => write!(f, "device"),
            SourceTag::Manual => write!(f, "manual"),
        }
    }
}

/// Body of `POST /telegram/notify`.
#[derive(Debug, Default, Deserialize)]
pub struct NotifyRequest {
    pub message: Option<String>,
    pub source: Option<SourceTag>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundNotification {
    pub text: String,
    pub source: SourceTag,
    pub requested_at: DateTime<Utc>,
}

impl OutboundNotification {
    pub fn new(text: impl Into<String>, source: SourceTag) -> Self {
        Self {
            text: text.into(),
            source,
            requested_at: Utc::now(),
        }
    }

    /// Validate a device request. A missing message means "send the default notice".
    ///
    /// Caller text is escaped for HTML parse mode; only the default notice
    /// carries markup.
    pub fn from_request(req: NotifyRequest) -> Result<Self, MalformedInput> {
        let text = match req.message {
            None => DEFAULT_NOTIFICATION.to_string(),
            Some(m) if m.trim().is_empty() => {
                return Err(MalformedInput("message must not be empty".into()));
            }
            Some(m) if m.chars().count() > MAX_MESSAGE_LENGTH => {
                return Err(MalformedInput(format!(
                    "message longer than {MAX_MESSAGE_LENGTH} characters"
                )));
            }
            Some(m) => escape_html(&m),
        };
        Ok(Self::new(text, req.source.unwrap_or_default()))
    }
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_update(update_id: i64, chat_id: i64, text: &str) -> String {
        serde_json::json!({
            "update_id": update_id,
            "message": {
                "message_id": 55,
                "date": 1_700_000_000,
                "chat": { "id": chat_id, "type": "private", "first_name": "Mia" },
                "from": { "id": 99, "is_bot": false, "first_name": "Mia" },
                "text": text
            }
        })
        .to_string()
    }

    #[test]
    fn test_parse_text_update() {
        let body = text_update(1, 7662478522, "hello");
        let parsed = parse_update(body.as_bytes()).unwrap();

        let ParsedUpdate::Message(update) = parsed else {
            panic!("expected a message");
        };
        assert_eq!(update.update_id, 1);
        assert_eq!(update.chat_id, 7662478522);
        assert_eq!(update.sender_id, Some(99));
        assert_eq!(update.sender_name, "Mia");
        assert_eq!(update.message_id, 55);
        assert_eq!(update.body, MessageBody::Text("hello".into()));
        assert_eq!(update.sent_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_update_without_message_is_ignored() {
        let body = r#"{"update_id": 5, "edited_message": {"message_id": 1}}"#;
        assert_eq!(
            parse_update(body.as_bytes()).unwrap(),
            ParsedUpdate::Ignored { update_id: 5, reason: "no message" }
        );
    }

    #[test]
    fn test_parse_voice_message() {
        let body = r#"{"update_id": 6, "message": {"message_id": 2, "chat": {"id": 1}, "voice": {"file_id": "AwACAg", "file_unique_id": "u1", "duration": 3}}}"#;
        let ParsedUpdate::Message(update) = parse_update(body.as_bytes()).unwrap() else {
            panic!("expected a message");
        };
        assert_eq!(
            update.body,
            MessageBody::Voice { file_id: "AwACAg".into(), duration_secs: 3 }
        );
        assert_eq!(update.body.kind(), "voice");
        assert_eq!(update.command(), None);
    }

    #[test]
    fn test_sticker_is_unsupported_not_ignored() {
        let body = r#"{"update_id": 8, "message": {"message_id": 4, "chat": {"id": 1}, "sticker": {"file_id": "s"}}}"#;
        let ParsedUpdate::Message(update) = parse_update(body.as_bytes()).unwrap() else {
            panic!("expected a message");
        };
        assert_eq!(update.body, MessageBody::Unsupported);
    }

    #[test]
    fn test_malformed_updates_rejected() {
        assert!(parse_update(b"not json").is_err());
        assert!(parse_update(br#"{"message": {}}"#).is_err());
        assert!(parse_update(br#"{"update_id": "one"}"#).is_err());
        assert!(parse_update(br#"{"update_id": 1, "message": {"message_id": 1}}"#).is_err());
    }

    #[test]
    fn test_sender_name_falls_back() {
        let body = r#"{"update_id": 7, "message": {"message_id": 3, "chat": {"id": 1}, "text": "hi"}}"#;
        let ParsedUpdate::Message(update) = parse_update(body.as_bytes()).unwrap() else {
            panic!("expected a message");
        };
        assert_eq!(update.sender_name, "User");
        assert_eq!(update.sender_id, None);
    }

    #[test]
    fn test_command_extraction() {
        let mut update = match parse_update(text_update(1, 1, "/start").as_bytes()).unwrap() {
            ParsedUpdate::Message(u) => u,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(update.command(), Some("start"));

        update.body = MessageBody::Text("/start@joy_girl_bot extra".into());
        assert_eq!(update.command(), Some("start"));

        update.body = MessageBody::Text("hello /start".into());
        assert_eq!(update.command(), None);
    }

    #[test]
    fn test_notification_defaults() {
        let note = OutboundNotification::from_request(NotifyRequest::default()).unwrap();
        assert_eq!(note.text, DEFAULT_NOTIFICATION);
        assert_eq!(note.source, SourceTag::Device);
    }

    #[test]
    fn test_notification_from_json() {
        let req: NotifyRequest =
            serde_json::from_str(r#"{"message": "door opened", "source": "manual"}"#).unwrap();
        let note = OutboundNotification::from_request(req).unwrap();
        assert_eq!(note.text, "door opened");
        assert_eq!(note.source, SourceTag::Manual);
    }

    #[test]
    fn test_notification_text_is_escaped() {
        let req = NotifyRequest {
            message: Some("temp < 5 & falling".into()),
            source: None,
        };
        let note = OutboundNotification::from_request(req).unwrap();
        assert_eq!(note.text, "temp &lt; 5 &amp; falling");
    }

    #[test]
    fn test_notification_rejects_bad_messages() {
        let empty = NotifyRequest { message: Some("  ".into()), source: None };
        assert!(OutboundNotification::from_request(empty).is_err());

        let huge = NotifyRequest {
            message: Some("x".repeat(MAX_MESSAGE_LENGTH + 1)),
            source: None,
        };
        assert!(OutboundNotification::from_request(huge).is_err());

        assert!(serde_json::from_str::<NotifyRequest>(r#"{"message": 5}"#).is_err());
        assert!(serde_json::from_str::<NotifyRequest>(r#"{"source": "satellite"}"#).is_err());
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a < b && c > d"), "a &lt; b &amp;&amp; c &gt; d");
        assert_eq!(escape_html("plain 🌸"), "plain 🌸");
    }
}
