//! Per-chat conversation state.
//!
//! The store hands out one lock per chat id. The relay holds that lock for the
//! whole handling of an update, so duplicate deliveries and interleaved
//! replies for the same chat are serialized while other chats run freely.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::deepseek::{Message, Role};

/// Update ids remembered per chat for replay detection.
pub const SEEN_UPDATES_CAPACITY: usize = 100;

/// Rolling conversation state for one chat.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub chat_id: i64,
    pub last_seen: Option<DateTime<Utc>>,
    /// Recently processed update ids, oldest first.
    seen_order: VecDeque<i64>,
    seen: HashSet<i64>,
    history: VecDeque<Message>,
    max_turns: usize,
}

impl ChatSession {
    pub fn new(chat_id: i64, max_turns: usize) -> Self {
        Self {
            chat_id,
            last_seen: None,
            seen_order: VecDeque::new(),
            seen: HashSet::new(),
            history: VecDeque::new(),
            max_turns,
        }
    }

    /// Record `update_id` as processed. Returns false for a replay.
    ///
    /// Only ids seen recently count. Concurrent deliveries can arrive out of
    /// order and Telegram may restart its id sequence, so ordering is not used.
    pub fn observe_update(&mut self, update_id: i64, at: DateTime<Utc>) -> bool {
        if !self.seen.insert(update_id) {
            return false;
        }
        self.seen_order.push_back(update_id);
        if self.seen_order.len() > SEEN_UPDATES_CAPACITY
            && let Some(oldest) = self.seen_order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.last_seen = Some(at);
        true
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.history.push_back(Message::user(text));
        self.truncate();
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.history.push_back(Message::assistant(text));
        self.truncate();
    }

    /// Drop a trailing user turn that never got an answer.
    pub fn discard_unanswered(&mut self) {
        if self.history.back().is_some_and(|m| m.role == Role::User) {
            self.history.pop_back();
        }
    }

    /// History oldest first, as sent to the model.
    pub fn history(&self) -> Vec<Message> {
        self.history.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Keep the last `max_turns` exchanges and never start on an assistant turn.
    fn truncate(&mut self) {
        let limit = self.max_turns * 2;
        while self.history.len() > limit {
            self.history.pop_front();
        }
        while self.history.front().is_some_and(|m| m.role == Role::Assistant) {
            self.history.pop_front();
        }
    }
}

/// Arena of sessions keyed by chat id, scoped to the process.
pub struct SessionStore {
    sessions: Mutex<HashMap<i64, Arc<Mutex<ChatSession>>>>,
    max_turns: usize,
}

impl SessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_turns,
        }
    }

    /// The session for `chat_id`, created on first use.
    pub async fn session(&self, chat_id: i64) -> Arc<Mutex<ChatSession>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(chat_id)
            .or_insert_with(|| Arc::new(Mutex::new(ChatSession::new(chat_id, self.max_turns))))
            .clone()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
