//! Generation gateway and the retrieve-then-generate chain.
//!
//! The language model itself is an external collaborator. `EchoGeneration`
//! returns the assembled prompt verbatim, which keeps offline runs and tests
//! deterministic; `OpenAiChat` calls an OpenAI-compatible
//! `/chat/completions` endpoint.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tessera_core::config::GenerationConfig;
use tessera_core::error::TesseraError;
use tessera_core::types::{MetadataFilter, RetrievalResult};

use crate::embedding::{
    build_client, classify_status, classify_transport_error, retry_backoff, BoxFuture,
};
use crate::retriever::{self, Retriever};

/// Everything a model needs to answer one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_instruction: String,
    /// Formatted context block (see [`retriever::format`]).
    pub context: String,
    pub user_query: String,
}

impl GenerationRequest {
    /// System message: the instruction followed by the context block.
    pub fn system_message(&self) -> String {
        format!("{}\n\n{}", self.system_instruction, self.context)
    }

    /// Flat single-string rendering of the whole prompt.
    pub fn render(&self) -> String {
        format!("{}\n\nQuestion: {}", self.system_message(), self.user_query)
    }
}

/// Produces an answer from a prompt.
pub trait GenerationGateway: Send + Sync {
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<String, TesseraError>> + Send;
}

/// Object-safe version of [`GenerationGateway`].
pub trait DynGenerationGateway: Send + Sync {
    fn generate_boxed<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<String, TesseraError>>;
}

impl<T: GenerationGateway> DynGenerationGateway for T {
    fn generate_boxed<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> BoxFuture<'a, Result<String, TesseraError>> {
        Box::pin(self.generate(request))
    }
}

// ---------------------------------------------------------------------------
// EchoGeneration
// ---------------------------------------------------------------------------

/// Returns the rendered prompt as the answer.
#[derive(Debug, Clone, Default)]
pub struct EchoGeneration;

impl GenerationGateway for EchoGeneration {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TesseraError> {
        Ok(request.render())
    }
}

// ---------------------------------------------------------------------------
// OpenAiChat
// ---------------------------------------------------------------------------

/// Chat-completions client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_retries: usize,
    backoff_base: Duration,
}

impl std::fmt::Debug for OpenAiChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChat")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiChat {
    pub fn from_config(config: &GenerationConfig) -> Result<Self, TesseraError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            TesseraError::Config(format!(
                "generation provider requires an API key in ${}",
                config.api_key_env
            ))
        })?;
        Self::new(config, &api_key)
    }

    pub fn new(config: &GenerationConfig, api_key: &str) -> Result<Self, TesseraError> {
        if config.model.trim().is_empty() {
            return Err(TesseraError::Config("generation.model is empty".to_string()));
        }
        Ok(Self {
            client: build_client(api_key, config.request_timeout())?,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            max_retries: config.max_retries.max(1),
            backoff_base: Duration::from_millis(500),
        })
    }

    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    async fn send_once(&self, body: &ChatRequest<'_>) -> Result<String, TesseraError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(classify_status(status, &text));
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| {
            TesseraError::provider_permanent(format!("failed to decode chat response: {}", e))
        })?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TesseraError::provider_permanent("chat response has no content"))
    }
}

impl GenerationGateway for OpenAiChat {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TesseraError> {
        let system = request.system_message();
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_query,
                },
            ],
        };

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.send_once(&body).await {
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = retry_backoff(self.backoff_base, attempt);
                    warn!(attempt, ?delay, error = %err, "Chat request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// RagChain
// ---------------------------------------------------------------------------

/// A generated answer and the records it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<RetrievalResult>,
}

/// Retriever, then context formatting, then generation.
#[derive(Clone)]
pub struct RagChain {
    retriever: Retriever,
    generator: Arc<dyn DynGenerationGateway>,
    system_instruction: String,
}

impl RagChain {
    pub fn new(
        retriever: Retriever,
        generator: Arc<dyn DynGenerationGateway>,
        system_instruction: impl Into<String>,
    ) -> Self {
        Self {
            retriever,
            generator,
            system_instruction: system_instruction.into(),
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub async fn answer(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Answer, TesseraError> {
        let sources = self.retriever.retrieve(query, k, filter).await?;
        self.answer_from(query, sources).await
    }

    /// Generate from already-retrieved sources.
    pub async fn answer_from(
        &self,
        query: &str,
        sources: Vec<RetrievalResult>,
    ) -> Result<Answer, TesseraError> {
        let request = GenerationRequest {
            system_instruction: self.system_instruction.clone(),
            context: retriever::format(&sources),
            user_query: query.to_string(),
        };

        debug!(sources = sources.len(), "Generating answer");
        let answer = self.generator.generate_boxed(&request).await?;
        info!(sources = sources.len(), chars = answer.len(), "Answer generated");

        Ok(Answer { answer, sources })
    }
}
