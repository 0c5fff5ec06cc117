use std::sync::Arc;

use tracing::{error, info};

use joyrelay::api::{self, AppState};
use joyrelay::config::Config;
use joyrelay::deepseek::DeepSeekClient;
use joyrelay::logging;
use joyrelay::relay::{Relay, SessionStore, TelegramClient};
use joyrelay::transcription::WhisperClient;

#[tokio::main]
async fn main() {
    // A missing .env file is fine; the process environment may be complete
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let _guard = logging::init(config.log_dir.as_deref()).expect("Failed to set up logging");

    info!("🚀 Starting joyrelay v{}", env!("CARGO_PKG_VERSION"));
    info!("Notification chat: {}", config.chat_id);
    info!("Model: {} at {}", config.llm_model, config.llm_base_url);
    if config.allowed_chat_ids.is_empty() {
        info!("Answering every chat");
    } else {
        info!("Answering chats: {:?}", config.allowed_chat_ids);
    }
    if config.relay_token.is_none() {
        info!("⚠️ RELAY_TOKEN not set, device endpoints are open");
    }

    let telegram = TelegramClient::new(
        &config.bot_token,
        config.chat_timeout,
        config.webhook_secret.clone(),
    )
    .expect("Failed to build Telegram client");

    let deepseek = DeepSeekClient::new(
        config.llm_api_key.clone(),
        config.llm_base_url.clone(),
        config.completion_settings(),
        config.llm_timeout,
    )
    .expect("Failed to build DeepSeek client");

    let mut relay = Relay::new(
        config.relay_config(),
        Arc::new(telegram),
        Arc::new(deepseek),
        Arc::new(SessionStore::new(config.history_turns)),
    );

    match config.transcription_api_key.clone() {
        Some(key) => {
            let whisper = WhisperClient::new(
                key,
                config.transcription_base_url.clone(),
                config.transcription_model.clone(),
                config.transcription_timeout,
            )
            .expect("Failed to build transcription client");
            info!("🎤 Voice transcription via {}", config.transcription_model);
            relay = relay.with_transcriber(Arc::new(whisper));
        }
        None => info!("🎤 No transcription key, voice notes get the fallback text"),
    }

    let state = AppState::new(Arc::new(relay))
        .with_relay_token(config.relay_token.clone())
        .with_webhook_secret(config.webhook_secret.clone());

    let addr = match config.bind_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("❌ {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = api::serve(addr, state).await {
        error!("Server error: {e}");
        std::process::exit(1);
    }
}
