//! Tessera core crate - shared types, error taxonomy, and configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::TesseraConfig;
pub use error::{ProviderErrorKind, Result, TesseraError};
pub use types::*;
