//! Bearer-token authentication.
//!
//! The token lives in `<data_dir>/api_token` and is generated on first
//! start. Every route except /health runs through [`require_auth`].

use std::path::Path;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::Rng;

use crate::error::ApiError;
use crate::state::AppState;

/// Generate a random 128-bit token, hex-encoded.
pub fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

/// Read the token from `path`, or generate one and write it there.
///
/// A file that cannot be written still yields a usable token for this run.
pub fn load_or_generate_token(path: &Path) -> String {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let token = generate_token();
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("Failed to create {}: {}", parent.display(), e);
        }
    }
    match std::fs::write(path, &token) {
        Ok(()) => {
            restrict_permissions(path);
            tracing::info!("Generated API token at {}", path.display());
        }
        Err(e) => tracing::warn!("Failed to write API token to {}: {}", path.display(), e),
    }
    token
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to restrict {}: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

/// Reject requests without `Authorization: Bearer <token>`.
///
/// Passes everything through when the state carries no token.
pub async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.api_token.as_deref() else {
        return next.run(req).await;
    };

    let header = match req.headers().get(AUTHORIZATION) {
        Some(value) => value,
        None => {
            return ApiError::Unauthorized("Missing Authorization header".to_string())
                .into_response()
        }
    };
    let header = match header.to_str() {
        Ok(s) => s,
        Err(_) => {
            return ApiError::Unauthorized("Invalid Authorization header encoding".to_string())
                .into_response()
        }
    };

    match header.strip_prefix("Bearer ") {
        Some(token) if token == expected => next.run(req).await,
        _ => ApiError::Unauthorized("Invalid bearer token".to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_is_32_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_load_or_generate_token_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("api_token");

        let first = load_or_generate_token(&path);
        assert!(path.exists());
        let second = load_or_generate_token(&path);
        assert_eq!(first, second);
    }

    #[test]
    fn test_load_existing_token_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_token");
        std::fs::write(&path, "abc123\n").unwrap();
        assert_eq!(load_or_generate_token(&path), "abc123");
    }

    #[test]
    fn test_empty_token_file_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_token");
        std::fs::write(&path, "  \n").unwrap();
        let token = load_or_generate_token(&path);
        assert_eq!(token.len(), 32);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), token);
    }

    #[cfg(unix)]
    #[test]
    fn test_generated_token_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_token");
        load_or_generate_token(&path);
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
