//! Router configuration and server setup.

use std::any::Any;
use std::net::SocketAddr;

use axum::{
    Router,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::auth::require_token;
use super::error::ApiError;
use super::handlers;
use super::state::AppState;

/// Creates the router with all routes configured.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    // Device and admin endpoints, behind the relay token
    let guarded = Router::new()
        .route("/telegram/notify", post(handlers::notify))
        .route(
            "/telegram/setWebhook",
            get(handlers::set_webhook).post(handlers::set_webhook),
        )
        .route("/telegram/deleteWebhook", post(handlers::delete_webhook))
        .route("/telegram/webhookInfo", get(handlers::webhook_info))
        .route("/telegram/info", get(handlers::bot_info))
        .route(
            "/messages",
            get(handlers::list_messages).delete(handlers::clear_messages),
        )
        .route("/messages/latest", get(handlers::latest_message))
        .route("/chat", post(handlers::chat))
        .route("/chat/esp32", post(handlers::chat_esp32))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/telegram/webhook", post(handlers::telegram_webhook))
        .merge(guarded)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("💥 Handler panicked: {detail}");
    ApiError::Internal("handler panicked".into()).into_response()
}

/// Serves the router until ctrl-c.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🌐 Listening on {addr}");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("👋 Shutting down");
}
