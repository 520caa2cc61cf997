//! Per-client fixed-window rate limiting.
//!
//! Clients are keyed by peer IP when the server runs with connect info,
//! otherwise they share one bucket. Each client gets `max_per_sec`
//! requests per one-second window; the rest get 429.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{ConnectInfo, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use tokio::time::Instant;

use crate::error::ApiError;

const WINDOW: Duration = Duration::from_secs(1);

/// Windows kept before stale ones are swept.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u64,
}

/// Shared rate limiter. Cloning shares the same counters.
#[derive(Clone)]
pub struct RateLimiter {
    max_per_sec: u64,
    clients: Arc<Mutex<HashMap<String, Window>>>,
}

impl RateLimiter {
    pub fn new(max_per_sec: u64) -> Self {
        Self {
            max_per_sec,
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count one request for `client`. Returns false once the client's
    /// current window is full.
    pub fn try_acquire(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if clients.len() >= SWEEP_THRESHOLD {
            clients.retain(|_, window| now.duration_since(window.started) < WINDOW);
        }

        let window = clients.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= WINDOW {
            window.started = now;
            window.count = 0;
        }
        if window.count >= self.max_per_sec {
            return false;
        }
        window.count += 1;
        true
    }
}

fn client_key(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Middleware that returns 429 when the client is over its limit.
pub async fn rate_limit_middleware(
    Extension(limiter): Extension<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    let client = client_key(&req);
    if !limiter.try_acquire(&client) {
        tracing::debug!(client = %client, "Rate limit exceeded");
        return ApiError::TooManyRequests("Rate limit exceeded".to_string()).into_response();
    }
    next.run(req).await
}
