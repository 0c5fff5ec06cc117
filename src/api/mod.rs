//! HTTP surface: Telegram webhook, device endpoints and webhook admin.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use error::{ApiError, Result};
pub use router::{create_router, serve};
pub use state::AppState;
