//! Recent exchanges kept for the device to poll.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

/// Entries kept before the oldest is dropped.
pub const MAILBOX_CAPACITY: usize = 20;

/// Widest line the device's OLED screen shows at once.
pub const OLED_CHUNK_SIZE: usize = 120;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MailboxEntry {
    /// Telegram message id of the user's message.
    pub id: i64,
    pub text: String,
    pub from_user: String,
    pub timestamp: DateTime<Utc>,
    pub response: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A poll result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MailboxPage {
    pub messages: Vec<MailboxEntry>,
    pub count: usize,
    pub total: usize,
    pub waiting: bool,
}

#[derive(Default)]
struct Inner {
    entries: VecDeque<MailboxEntry>,
    waiting: bool,
}

#[derive(Default)]
pub struct Mailbox {
    inner: Mutex<Inner>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a finished exchange and clear the waiting flag.
    pub async fn push(&self, entry: MailboxEntry) {
        let mut inner = self.inner.lock().await;
        inner.entries.push_back(entry);
        while inner.entries.len() > MAILBOX_CAPACITY {
            inner.entries.pop_front();
        }
        inner.waiting = false;
    }

    /// Mark that a notification went out and a reply is expected.
    pub async fn set_waiting(&self) {
        self.inner.lock().await.waiting = true;
    }

    /// The last `limit` entries with an id above `since_id`.
    pub async fn since(&self, since_id: i64, limit: usize) -> MailboxPage {
        let inner = self.inner.lock().await;
        let filtered: Vec<&MailboxEntry> =
            inner.entries.iter().filter(|e| e.id > since_id).collect();
        let skip = filtered.len().saturating_sub(limit);
        let messages: Vec<MailboxEntry> = filtered.into_iter().skip(skip).cloned().collect();

        MailboxPage {
            count: messages.len(),
            messages,
            total: inner.entries.len(),
            waiting: inner.waiting,
        }
    }

    pub async fn latest(&self) -> Option<MailboxEntry> {
        self.inner.lock().await.entries.back().cloned()
    }

    pub async fn clear(&self) {
        self.inner.lock().await.entries.clear();
    }
}

/// Split `text` into lines of at most `max_chars`, packing whole words.
///
/// A word longer than `max_chars` becomes a chunk of its own.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current.is_empty() {
            current.push_str(word);
            current_len = word_len;
        } else if current_len + 1 + word_len <= max_chars {
            current.push(' ');
            current.push_str(word);
            current_len += 1 + word_len;
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(word);
            current_len = word_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
