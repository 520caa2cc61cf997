use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, TesseraError};

/// Top-level configuration for Tessera.
///
/// Loaded from `~/.tessera/config.toml` by default. Every section falls
/// back to its defaults when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TesseraConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl TesseraConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TesseraConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing
    /// or unparseable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject settings that would only fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;

        if self.embedding.dimensions == 0 {
            return Err(TesseraError::Config(
                "embedding.dimensions must be greater than zero".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(TesseraError::Config(
                "embedding.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.retrieval.default_k == 0 || self.retrieval.default_k > self.retrieval.max_k {
            return Err(TesseraError::Config(format!(
                "retrieval.default_k must be in 1..={}",
                self.retrieval.max_k
            )));
        }
        Ok(())
    }

    /// Data directory with a leading `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.general.data_dir)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding `tessera.db`.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Keep the ledger and records in memory only.
    pub ephemeral: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.tessera/data".to_string(),
            log_level: "info".to_string(),
            ephemeral: false,
        }
    }
}

/// Text splitting parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    pub max_chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub overlap: usize,
    /// Split points in priority order. `""` means hard cut.
    pub separators: Vec<String>,
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            return Err(TesseraError::Config(
                "chunking.max_chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.max_chunk_size {
            return Err(TesseraError::Config(format!(
                "chunking.overlap ({}) must be smaller than chunking.max_chunk_size ({})",
                self.overlap, self.max_chunk_size
            )));
        }
        Ok(())
    }
}

/// Separators used when none are configured.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", ".", "!", "?", " ", ""];

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 500,
            overlap: 50,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Embedding provider selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "mock" or "openai" (any OpenAI-compatible endpoint).
    pub provider: String,
    pub base_url: String,
    pub model: String,
    /// Vector dimensionality; fixed for the lifetime of an index.
    pub dimensions: usize,
    /// Send `dimensions` with each request. Turn off for models that
    /// reject it, such as text-embedding-ada-002.
    pub send_dimensions: bool,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Largest number of texts sent in one request.
    pub batch_size: usize,
    pub request_timeout_secs: u64,
    pub max_retries: usize,
    /// Deadline for a whole ingestion or retrieval call. 0 disables it.
    pub deadline_secs: u64,
}

impl EmbeddingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs))
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 384,
            send_dimensions: true,
            api_key_env: "OPENAI_API_KEY".to_string(),
            batch_size: 64,
            request_timeout_secs: 30,
            max_retries: 3,
            deadline_secs: 60,
        }
    }
}

/// Generation provider selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// "echo" or "openai".
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub max_retries: usize,
    /// System instruction placed ahead of the retrieved context.
    pub system_instruction: String,
}

impl GenerationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "echo".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 60,
            max_retries: 2,
            system_instruction: "Answer the question using the reference material provided. \
                                 If the material does not cover it, say so plainly."
                .to_string(),
        }
    }
}

/// Query defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
    pub max_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 4,
            max_k: 100,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Request body limit in bytes.
    pub max_body_bytes: usize,
    /// Require `Authorization: Bearer <token>` on every route except /health.
    pub require_auth: bool,
    /// Requests per second allowed for each client. 0 disables limiting.
    pub rate_limit_per_sec: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3040,
            max_body_bytes: 4 * 1024 * 1024,
            require_auth: true,
            rate_limit_per_sec: 100,
        }
    }
}
