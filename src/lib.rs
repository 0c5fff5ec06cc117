//! Relay between an ESP32 companion device, Telegram and DeepSeek.

pub mod api;
pub mod config;
pub mod deepseek;
pub mod logging;
pub mod relay;
pub mod transcription;
