//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, a body-size limit, and
//! all endpoint handlers. /health is public; everything else is rate
//! limited and requires the bearer token.

use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use tessera_core::config::TesseraConfig;
use tessera_core::error::TesseraError;

use crate::auth;
use crate::handlers;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // CORS: allow same-host browser tools on the configured port.
    let port = state.config.api.port;
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
    ]
    .iter()
    .filter_map(|origin| origin.parse().ok())
    .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION]);

    let body_limit = state.config.api.max_body_bytes;
    let rate_limit = state.config.api.rate_limit_per_sec;

    let public: Router<AppState> = Router::new().route("/health", get(handlers::health));

    let mut protected: Router<AppState> = Router::new()
        .route("/stats", get(handlers::stats))
        .route("/ingest", post(handlers::ingest))
        .route("/query", post(handlers::query))
        .route("/records", delete(handlers::delete_records));
    if rate_limit > 0 {
        protected = protected
            .layer(axum::middleware::from_fn(rate_limit_middleware))
            .layer(axum::Extension(RateLimiter::new(rate_limit)));
    }
    let protected = protected.route_layer(axum::middleware::from_fn_with_state(
        state.clone(),
        auth::require_auth,
    ));

    public
        .merge(protected)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the configured address.
///
/// Runs until Ctrl-C, then drains in-flight requests.
pub async fn start_server(config: &TesseraConfig, state: AppState) -> Result<(), TesseraError> {
    let addr = format!("{}:{}", config.api.host, config.api.port);
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
