//! Relay between the device, Telegram and the language model.

pub mod debounce;
pub mod engine;
pub mod mailbox;
pub mod message;
pub mod ports;
pub mod retry;
pub mod session;
pub mod telegram;


pub use engine::{DeliveryError, DeliveryResult, Relay, RelayConfig, UpdateOutcome};
pub use message::{InboundUpdate, MessageBody, NotifyRequest, OutboundNotification, ParsedUpdate, SourceTag};
pub use ports::{ChatPlatform, CompletionBackend, Transcriber};
pub use session::SessionStore;
pub use telegram::TelegramClient;
