//! HTTP route handlers.
//!
//! Each handler extracts parameters, calls into the vector crate, and maps
//! `TesseraError` to an HTTP response through `ApiError`.

use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tessera_core::types::{IngestSummary, Metadata, MetadataFilter, RetrievalResult};
use tessera_vector::retriever;

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request / response types
// =============================================================================

/// Request body for POST /ingest.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestBody {
    pub source_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Request body for POST /query.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryBody {
    pub query: String,
    /// Number of results; defaults to `retrieval.default_k`.
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub filter: Option<MetadataFilter>,
    /// Also run the generation step over the retrieved context.
    #[serde(default)]
    pub generate: bool,
}

/// One scored match in a query response.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryHit {
    pub id: String,
    pub score: f64,
    pub text: String,
    pub metadata: Metadata,
}

impl From<RetrievalResult> for QueryHit {
    fn from(result: RetrievalResult) -> Self {
        Self {
            id: result.record.id,
            score: result.score,
            text: result.record.text,
            metadata: result.record.metadata,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<QueryHit>,
    /// Bracketed context block built from `results`.
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

/// Request body for DELETE /records. Either list may be empty, not both.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteBody {
    #[serde(default)]
    pub ids: Vec<String>,
    /// Delete every record ingested under this source.
    #[serde(default)]
    pub source_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// Ids submitted for deletion (unknown ids are ignored).
    pub requested: usize,
    pub remaining: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub records: usize,
    pub fingerprints: usize,
    pub dimensions: usize,
    pub persistent: bool,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /ingest - run one document through the ingestion pipeline.
pub async fn ingest(
    State(state): State<AppState>,
    Json(body): Json<IngestBody>,
) -> Result<Json<IngestSummary>, ApiError> {
    if body.source_id.trim().is_empty() {
        return Err(ApiError::BadRequest("'source_id' must not be empty".to_string()));
    }

    let request = tessera_core::types::IngestRequest {
        source_id: body.source_id,
        text: body.text,
        metadata: body.metadata,
    };
    let summary = state.pipeline.ingest(request).await?;
    Ok(Json(summary))
}

/// POST /query - retrieve context and optionally generate an answer.
pub async fn query(
    State(state): State<AppState>,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryResponse>, ApiError> {
    if body.query.trim().is_empty() {
        return Err(ApiError::BadRequest("'query' must not be empty".to_string()));
    }

    let retrieval = &state.config.retrieval;
    let k = body.k.unwrap_or(retrieval.default_k);
    if k == 0 || k > retrieval.max_k {
        return Err(ApiError::BadRequest(format!(
            "'k' must be between 1 and {}",
            retrieval.max_k
        )));
    }

    let filter = body.filter.as_ref().filter(|f| !f.is_empty());
    let deadline = state.config.embedding.deadline();

    let results = match deadline {
        Some(timeout) => {
            state
                .retriever()
                .retrieve_within(&body.query, k, filter, timeout)
                .await?
        }
        None => state.retriever().retrieve(&body.query, k, filter).await?,
    };
    let context = retriever::format(&results);
    debug!(k, hits = results.len(), generate = body.generate, "Query served");

    let (answer, results) = if body.generate {
        let answer = with_deadline(
            state.config.generation.request_timeout(),
            state.chain.answer_from(&body.query, results),
        )
        .await?;
        (Some(answer.answer), answer.sources)
    } else {
        (None, results)
    };

    Ok(Json(QueryResponse {
        results: results.into_iter().map(QueryHit::from).collect(),
        context,
        answer,
    }))
}

/// DELETE /records - remove records by id or by source.
pub async fn delete_records(
    State(state): State<AppState>,
    Json(body): Json<DeleteBody>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let mut ids = body.ids;
    if let Some(source_id) = body.source_id.as_deref() {
        ids.extend(state.index().ids_for_source(source_id)?);
    }
    if ids.is_empty() && body.source_id.is_none() {
        return Err(ApiError::BadRequest(
            "provide 'ids' or 'source_id'".to_string(),
        ));
    }

    state.index().delete(&ids)?;
    info!(requested = ids.len(), "Deleted records");

    Ok(Json(DeleteResponse {
        requested: ids.len(),
        remaining: state.index().len(),
    }))
}

/// GET /stats - index and ledger sizes.
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    Ok(Json(StatsResponse {
        records: state.index().len(),
        fingerprints: state.ledger().len()?,
        dimensions: state.index().dimensions(),
        persistent: state.index().is_persistent(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

/// GET /health - liveness check.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn with_deadline<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T, tessera_core::TesseraError>>,
) -> Result<T, ApiError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => Err(tessera_core::TesseraError::Timeout(timeout).into()),
    }
}
