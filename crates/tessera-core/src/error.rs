use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether a provider failure is worth retrying.
///
/// Gateways classify their own failures; the core only reads the kind and
/// never retries on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Transport hiccup, rate limit, or upstream 5xx.
    Temporary,
    /// Bad credentials, malformed request, or an unusable response.
    Permanent,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderErrorKind::Temporary => write!(f, "temporary"),
            ProviderErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// Top-level error type for Tessera.
///
/// The pipeline and retriever propagate the first failing step's error
/// unchanged, so callers can always tell "nothing relevant found" apart
/// from "the search failed".
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TesseraError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Provider error ({kind}): {message}")]
    Provider {
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("Deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TesseraError {
    /// Shorthand for a retryable provider failure.
    pub fn provider_temporary(message: impl Into<String>) -> Self {
        TesseraError::Provider {
            kind: ProviderErrorKind::Temporary,
            message: message.into(),
        }
    }

    /// Shorthand for a non-retryable provider failure.
    pub fn provider_permanent(message: impl Into<String>) -> Self {
        TesseraError::Provider {
            kind: ProviderErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// True when the caller may reasonably try the same operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TesseraError::Provider {
                kind: ProviderErrorKind::Temporary,
                ..
            } | TesseraError::Timeout(_)
        )
    }
}

impl From<toml::de::Error> for TesseraError {
    fn from(err: toml::de::Error) -> Self {
        TesseraError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for TesseraError {
    fn from(err: toml::ser::Error) -> Self {
        TesseraError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for TesseraError {
    fn from(err: serde_json::Error) -> Self {
        TesseraError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Tessera operations.
pub type Result<T> = std::result::Result<T, TesseraError>;
