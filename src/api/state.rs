//! Shared handler state.

use std::sync::Arc;

use crate::relay::Relay;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    /// Bearer token for device and admin endpoints. `None` leaves them open.
    pub relay_token: Option<Arc<str>>,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` on webhook deliveries.
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self {
            relay,
            relay_token: None,
            webhook_secret: None,
        }
    }

    pub fn with_relay_token(mut self, token: Option<String>) -> Self {
        self.relay_token = token.map(Arc::from);
        self
    }

    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret.map(Arc::from);
        self
    }
}
