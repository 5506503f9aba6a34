//! Axum admin console: session auth, per-environment handlers and askama pages.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;
pub mod templates;

pub use router::{app_router, start_server};
pub use state::AppState;
