//! Telegram-facing handlers: webhook ingress, device notifications, webhook admin.

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::parse_json;
use crate::api::auth::verify_webhook_secret;
use crate::api::error::Result;
use crate::api::state::AppState;
use crate::relay::engine::DeliveryResult;
use crate::relay::message::{NotifyRequest, OutboundNotification, ParsedUpdate, parse_update};

/// POST /telegram/webhook - Update delivered by Telegram.
///
/// Acknowledged as soon as it decodes; the reply runs in the background.
pub async fn telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    verify_webhook_secret(state.webhook_secret.as_deref(), &headers)?;

    match parse_update(&body)? {
        ParsedUpdate::Message(update) => {
            debug!("Webhook update {} for chat {}", update.update_id, update.chat_id);
            state.relay.clone().spawn_update(update);
            Ok(Json(json!({ "status": "ok" })))
        }
        ParsedUpdate::Ignored { update_id, reason } => {
            debug!("Ignoring update {update_id}: {reason}");
            Ok(Json(json!({ "status": "ignored", "reason": reason })))
        }
    }
}

/// POST /telegram/notify - Device asks for a notification.
///
/// An empty body sends the default detection notice.
pub async fn notify(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    let request: NotifyRequest = if body.iter().all(u8::is_ascii_whitespace) {
        NotifyRequest::default()
    } else {
        parse_json(&body, "notify body")?
    };
    let note = OutboundNotification::from_request(request)?;

    let response = match state.relay.handle_notification_request(note).await? {
        DeliveryResult::Delivered { message_id, at } => json!({
            "ok": true,
            "message": "Notification sent!",
            "message_id": message_id,
            "timestamp": at,
        }),
        DeliveryResult::Coalesced => json!({
            "ok": true,
            "message": "Notification coalesced",
            "coalesced": true,
        }),
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    pub webhook_url: String,
}

/// GET|POST /telegram/setWebhook?webhook_url=... - Register the webhook.
pub async fn set_webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
) -> Result<Json<Value>> {
    info!("Registering webhook {}", query.webhook_url);
    state.relay.register_webhook(&query.webhook_url).await?;
    Ok(Json(json!({ "ok": true, "url": query.webhook_url })))
}

/// POST /telegram/deleteWebhook - Remove the webhook.
pub async fn delete_webhook(State(state): State<AppState>) -> Result<Json<Value>> {
    state.relay.remove_webhook().await?;
    Ok(Json(json!({ "ok": true })))
}

/// GET /telegram/webhookInfo - Current registration.
pub async fn webhook_info(State(state): State<AppState>) -> Json<Value> {
    let registration = state.relay.webhook_info().await;
    Json(json!({ "ok": true, "result": registration }))
}

/// GET /telegram/info - Bot identity.
pub async fn bot_info(State(state): State<AppState>) -> Result<Json<Value>> {
    let identity = state.relay.bot_identity().await?;
    Ok(Json(json!({ "ok": true, "result": identity })))
}
