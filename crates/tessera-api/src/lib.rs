//! Tessera API crate - axum HTTP server and route handlers.
//!
//! Exposes document ingestion, similarity queries (optionally with a
//! generated answer), record deletion, stats, and a health check. All
//! routes but /health sit behind bearer-token auth and a rate limiter.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
