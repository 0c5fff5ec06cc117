//! Device mailbox polling.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::state::AppState;
use crate::relay::mailbox::MailboxPage;

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub since_id: i64,
}

fn default_limit() -> usize {
    5
}

/// GET /messages - Exchanges newer than `since_id`.
pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
) -> Json<MailboxPage> {
    Json(state.relay.mailbox().since(query.since_id, query.limit).await)
}

/// GET /messages/latest
pub async fn latest_message(State(state): State<AppState>) -> Json<Value> {
    match state.relay.mailbox().latest().await {
        Some(entry) => Json(json!(entry)),
        None => Json(json!({ "message": null })),
    }
}

/// DELETE /messages
pub async fn clear_messages(State(state): State<AppState>) -> Json<Value> {
    state.relay.mailbox().clear().await;
    Json(json!({ "status": "cleared" }))
}
