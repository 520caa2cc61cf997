//! Embedding gateway trait and implementations.
//!
//! - `OpenAiEmbedding` talks to any OpenAI-compatible `/embeddings` endpoint
//!   (OpenAI, DashScope compatible mode, local servers). It owns batching,
//!   retries and backoff.
//! - `MockEmbedding` provides deterministic feature-hashed vectors for tests
//!   and offline runs.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tessera_core::config::EmbeddingConfig;
use tessera_core::error::TesseraError;
use tessera_core::types::Fingerprint;

/// Boxed future used by the object-safe gateway traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Converts batches of text into fixed-dimensional vectors.
///
/// A response must contain exactly one vector per input, in input order,
/// each of `dimensions()` length. Anything else fails the whole batch.
pub trait EmbeddingGateway: Send + Sync {
    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, TesseraError>> + Send;

    /// Dimensionality of every vector this gateway produces.
    fn dimensions(&self) -> usize;

    /// Largest batch accepted by a single `embed` call.
    fn max_batch_size(&self) -> usize;
}

/// Object-safe version of [`EmbeddingGateway`] for dynamic dispatch.
///
/// `EmbeddingGateway::embed` returns `impl Future`, so it cannot be used as
/// a trait object. Every `EmbeddingGateway` gets this trait for free.
pub trait DynEmbeddingGateway: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>, TesseraError>>;

    fn dimensions(&self) -> usize;

    fn max_batch_size(&self) -> usize;
}

impl<T: EmbeddingGateway> DynEmbeddingGateway for T {
    fn embed_boxed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>, TesseraError>> {
        Box::pin(self.embed(texts))
    }

    fn dimensions(&self) -> usize {
        EmbeddingGateway::dimensions(self)
    }

    fn max_batch_size(&self) -> usize {
        EmbeddingGateway::max_batch_size(self)
    }
}

/// Reject a response that does not line up one-to-one with its inputs.
pub fn check_batch_shape(
    expected_len: usize,
    dimensions: usize,
    vectors: &[Vec<f32>],
) -> Result<(), TesseraError> {
    if vectors.len() != expected_len {
        return Err(TesseraError::provider_permanent(format!(
            "embedding response has {} vectors for {} inputs",
            vectors.len(),
            expected_len
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(TesseraError::provider_permanent(format!(
            "embedding response vector has {} dimensions, expected {}",
            bad.len(),
            dimensions
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// OpenAiEmbedding - OpenAI-compatible HTTP endpoint
// ---------------------------------------------------------------------------

/// Embeddings client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    send_dimensions: bool,
    batch_size: usize,
    max_retries: usize,
    backoff_base: Duration,
}

impl std::fmt::Debug for OpenAiEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedding")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OpenAiEmbedding {
    /// Build a client from configuration, reading the key from
    /// `config.api_key_env`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, TesseraError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            TesseraError::Config(format!(
                "embedding provider requires an API key in ${}",
                config.api_key_env
            ))
        })?;
        Self::new(config, &api_key)
    }

    pub fn new(config: &EmbeddingConfig, api_key: &str) -> Result<Self, TesseraError> {
        if config.model.trim().is_empty() {
            return Err(TesseraError::Config("embedding.model is empty".to_string()));
        }

        let client = build_client(api_key, config.request_timeout())?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimensions: config.dimensions,
            send_dimensions: config.send_dimensions,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries.max(1),
            backoff_base: Duration::from_millis(500),
        })
    }

    /// Override the base retry delay (doubles per attempt).
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Older models reject the `dimensions` field, so it is only sent when
    /// configured.
    fn request_body<'a>(&'a self, inputs: &'a [String]) -> EmbeddingRequest<'a> {
        EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.send_dimensions.then_some(self.dimensions),
            encoding_format: "float",
        }
    }

    async fn embed_one_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, TesseraError> {
        let request = self.request_body(inputs);

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let outcome = match self.client.post(&self.endpoint).json(&request).send().await {
                Ok(resp) => self.read_response(resp, inputs.len()).await,
                Err(err) => Err(classify_transport_error(&err)),
            };

            match outcome {
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = retry_backoff(self.backoff_base, attempt);
                    warn!(attempt, ?delay, error = %err, "Embedding request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn read_response(
        &self,
        resp: reqwest::Response,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>, TesseraError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(classify_status(status, &body));
        }

        let mut parsed: EmbeddingResponse = resp.json().await.map_err(|e| {
            TesseraError::provider_permanent(format!("failed to decode embedding response: {}", e))
        })?;
        parsed.data.sort_by_key(|entry| entry.index);
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        check_batch_shape(expected, self.dimensions, &vectors)?;
        Ok(vectors)
    }
}

impl EmbeddingGateway for OpenAiEmbedding {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, TesseraError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(batch = batch.len(), model = %self.model, "Requesting embeddings");
            out.extend(self.embed_one_batch(batch).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }
}

/// Build a JSON client with bearer auth. Shared with the chat gateway.
pub(crate) fn build_client(
    api_key: &str,
    timeout: Duration,
) -> Result<reqwest::Client, TesseraError> {
    let mut headers = HeaderMap::new();
    let auth = format!("Bearer {}", api_key.trim());
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&auth)
            .map_err(|_| TesseraError::Config("API key is not a valid header value".into()))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| TesseraError::Config(format!("failed to build HTTP client: {}", e)))
}

/// 429 and 5xx are worth retrying; every other failure status is not.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> TesseraError {
    let message = format!("provider returned {}: {}", status, truncate(body, 512));
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        TesseraError::provider_temporary(message)
    } else {
        TesseraError::provider_permanent(message)
    }
}

/// Timeouts and connection failures are transient. Anything else, including
/// a request that could not be built, will fail the same way again.
pub(crate) fn classify_transport_error(err: &reqwest::Error) -> TesseraError {
    if err.is_timeout() || err.is_connect() {
        TesseraError::provider_temporary(format!("transport error: {}", err))
    } else {
        TesseraError::provider_permanent(format!("request failed: {}", err))
    }
}

pub(crate) fn retry_backoff(base: Duration, attempt: usize) -> Duration {
    let capped = attempt.saturating_sub(1).min(5) as u32;
    base * (1u32 << capped)
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic feature-hashed vectors
// ---------------------------------------------------------------------------

/// Deterministic embedding gateway for tests and offline runs.
///
/// Each lowercase word is hashed into one signed bucket and the result is
/// L2-normalized, so identical texts produce identical vectors and texts
/// sharing words score higher than unrelated ones. Text with no words maps
/// to the zero vector.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
    max_batch_size: usize,
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new(384)
    }
}

impl MockEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            max_batch_size: 64,
        }
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size.max(1);
        self
    }

    /// Vector for one text.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut result = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Fingerprint::of_bytes(word.to_lowercase().as_bytes());
            let bytes = digest.as_bytes();
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&bytes[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dimensions as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            result[idx] += sign;
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }
        result
    }
}

impl EmbeddingGateway for MockEmbedding {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, TesseraError> {
        if texts.len() > self.max_batch_size {
            return Err(TesseraError::provider_permanent(format!(
                "batch of {} exceeds max {}",
                texts.len(),
                self.max_batch_size
            )));
        }
        if texts.iter().any(|t| t.is_empty()) {
            return Err(TesseraError::InvalidInput(
                "Cannot embed empty text".to_string(),
            ));
        }
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}
