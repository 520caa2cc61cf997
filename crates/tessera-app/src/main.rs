//! Tessera application binary - composition root.
//!
//! Ties together all Tessera crates into a single executable:
//! 1. Parse the command line and load configuration from TOML
//! 2. Initialize tracing
//! 3. Open storage (SQLite ledger + record store, or in-memory)
//! 4. Build the embedding and generation gateways named in config
//! 5. Run the requested command: serve the API, or ingest/query/delete/stats
//!    directly against the local store

mod cli;
mod loader;

use std::io::Read;
use std::sync::Arc;

use clap::Parser;

use tessera_core::config::TesseraConfig;
use tessera_core::error::TesseraError;
use tessera_core::types::IngestRequest;
use tessera_storage::{Database, RecordRepository};
use tessera_vector::{
    format_context, Chunker, DynEmbeddingGateway, DynGenerationGateway, EchoGeneration,
    FingerprintStore, IngestionPipeline, MemoryFingerprintStore, MockEmbedding, OpenAiChat,
    OpenAiEmbedding, RagChain, Retriever, SqliteFingerprintStore, VectorIndex,
};

use tessera_api::{auth, routes, AppState};

use cli::{CliArgs, Command, DeleteArgs, IngestArgs, QueryArgs, ServeArgs};
use loader::InputFormat;

/// Everything a command needs, wired once.
struct Services {
    pipeline: IngestionPipeline,
    chain: RagChain,
}

/// Pick the embedding provider named in config.
fn build_embedding(config: &TesseraConfig) -> Result<Arc<dyn DynEmbeddingGateway>, TesseraError> {
    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "mock" => Ok(Arc::new(
            MockEmbedding::new(embedding.dimensions).with_max_batch_size(embedding.batch_size),
        )),
        "openai" => Ok(Arc::new(OpenAiEmbedding::from_config(embedding)?)),
        other => Err(TesseraError::Config(format!(
            "unknown embedding provider '{}' (expected \"mock\" or \"openai\")",
            other
        ))),
    }
}

/// Pick the generation provider named in config.
fn build_generation(config: &TesseraConfig) -> Result<Arc<dyn DynGenerationGateway>, TesseraError> {
    match config.generation.provider.as_str() {
        "echo" => Ok(Arc::new(EchoGeneration)),
        "openai" => Ok(Arc::new(OpenAiChat::from_config(&config.generation)?)),
        other => Err(TesseraError::Config(format!(
            "unknown generation provider '{}' (expected \"echo\" or \"openai\")",
            other
        ))),
    }
}

/// Open the index and ledger: SQLite-backed, or memory-only when ephemeral.
fn open_storage(
    config: &TesseraConfig,
) -> Result<(Arc<VectorIndex>, Arc<dyn FingerprintStore>), TesseraError> {
    let dimensions = config.embedding.dimensions;

    if config.general.ephemeral {
        tracing::info!("Ephemeral mode: index and ledger kept in memory");
        return Ok((
            Arc::new(VectorIndex::new(dimensions)),
            Arc::new(MemoryFingerprintStore::new()),
        ));
    }

    let data_dir = config.data_dir();
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join("tessera.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    let index = VectorIndex::restore(
        dimensions,
        Arc::new(RecordRepository::new(Arc::clone(&db))),
    )?;
    tracing::info!(records = index.len(), dimensions, "Vector index restored");

    Ok((Arc::new(index), Arc::new(SqliteFingerprintStore::new(db))))
}

fn build_services(config: &TesseraConfig) -> Result<Services, TesseraError> {
    let (index, ledger) = open_storage(config)?;
    let embedding = build_embedding(config)?;
    let generation = build_generation(config)?;

    let pipeline = IngestionPipeline::new(
        Chunker::from_config(&config.chunking)?,
        Arc::clone(&embedding),
        Arc::clone(&index),
        ledger,
    )?
    .with_default_timeout(config.embedding.deadline());

    let chain = RagChain::new(
        Retriever::new(embedding, index),
        generation,
        config.generation.system_instruction.clone(),
    );

    tracing::info!(
        embedding = %config.embedding.provider,
        generation = %config.generation.provider,
        "Services ready"
    );
    Ok(Services { pipeline, chain })
}

/// Load the config file, returning a warning to log once tracing is up.
fn load_config(cli: &CliArgs) -> (TesseraConfig, Option<String>) {
    let path = cli.resolve_config_path();
    if !path.exists() {
        return (TesseraConfig::default(), None);
    }
    match TesseraConfig::load(&path) {
        Ok(config) => (config, None),
        Err(e) => (
            TesseraConfig::default(),
            Some(format!(
                "Failed to load config from {}: {}. Using defaults.",
                path.display(),
                e
            )),
        ),
    }
}

/// Layer CLI and environment overrides onto the file config.
fn apply_overrides(cli: &CliArgs, config: &mut TesseraConfig) {
    if let Some(dir) = cli.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    config.general.log_level = cli.resolve_log_level(&config.general.log_level);
    config.general.ephemeral |= cli.ephemeral;
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

// =============================================================================
// Commands
// =============================================================================

async fn run_serve(mut config: TesseraConfig, args: &ServeArgs) -> Result<(), TesseraError> {
    config.api.port = args.resolve_port(config.api.port);
    if let Some(ref host) = args.host {
        config.api.host = host.clone();
    }

    let services = build_services(&config)?;
    let mut state = AppState::new(config.clone(), services.pipeline, services.chain);
    if let Some(token) = resolve_api_token(&config) {
        state = state.with_api_token(token);
    }
    routes::start_server(&config, state).await
}

/// Bearer token for the API: TESSERA_API_TOKEN, else `<data_dir>/api_token`.
///
/// Ephemeral mode never writes the token; a fresh one is printed instead.
fn resolve_api_token(config: &TesseraConfig) -> Option<String> {
    if !config.api.require_auth {
        tracing::warn!("API authentication disabled");
        return None;
    }
    if let Ok(token) = std::env::var("TESSERA_API_TOKEN") {
        if !token.trim().is_empty() {
            tracing::info!("API token taken from TESSERA_API_TOKEN");
            return Some(token.trim().to_string());
        }
    }
    if config.general.ephemeral {
        let token = auth::generate_token();
        eprintln!("API token for this session: {}", token);
        return Some(token);
    }
    let path = config.data_dir().join("api_token");
    let token = auth::load_or_generate_token(&path);
    tracing::info!(path = %path.display(), "API token loaded");
    Some(token)
}

/// Read the ingest input and split it into requests per `--format`.
fn load_requests(args: &IngestArgs) -> Result<Vec<IngestRequest>, TesseraError> {
    let mut reader: Box<dyn Read> = if args.file.as_os_str() == "-" {
        Box::new(std::io::stdin())
    } else {
        Box::new(std::fs::File::open(&args.file)?)
    };
    let source = args.resolve_source_id();
    let base = args.metadata();

    match args.format {
        InputFormat::Text => {
            let mut text = String::new();
            reader.read_to_string(&mut text)?;
            Ok(vec![IngestRequest::new(source, text).with_metadata(base)])
        }
        InputFormat::Csv => loader::load_csv(reader, &source, &args.csv_options()?, &base),
        InputFormat::Json => loader::load_json(reader, &source, &args.json_path, false, &base),
        InputFormat::Jsonl => loader::load_json(reader, &source, &args.json_path, true, &base),
    }
}

async fn run_ingest(config: &TesseraConfig, args: &IngestArgs) -> Result<(), TesseraError> {
    let requests = load_requests(args)?;
    let services = build_services(config)?;

    if args.format == InputFormat::Text {
        for request in requests {
            let summary = services.pipeline.ingest(request).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        return Ok(());
    }

    let documents = requests.len();
    let mut duplicates = 0;
    let mut chunks = 0;
    for request in requests {
        let summary = services.pipeline.ingest(request).await?;
        if summary.duplicate {
            duplicates += 1;
        }
        chunks += summary.chunks_ingested;
    }
    tracing::info!(documents, duplicates, chunks, "Structured input ingested");

    let report = serde_json::json!({
        "documents": documents,
        "duplicates": duplicates,
        "chunks_ingested": chunks,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_query(config: &TesseraConfig, args: &QueryArgs) -> Result<(), TesseraError> {
    let retrieval = &config.retrieval;
    let k = args.k.unwrap_or(retrieval.default_k);
    if k == 0 || k > retrieval.max_k {
        return Err(TesseraError::InvalidInput(format!(
            "k must be between 1 and {}",
            retrieval.max_k
        )));
    }
    let filter = args.metadata_filter();

    let services = build_services(config)?;
    let retriever = services.chain.retriever();
    let results = match config.embedding.deadline() {
        Some(timeout) => {
            retriever
                .retrieve_within(&args.text, k, filter.as_ref(), timeout)
                .await?
        }
        None => retriever.retrieve(&args.text, k, filter.as_ref()).await?,
    };

    for result in &results {
        println!("{:.4}  {}", result.score, result.record.id);
    }
    println!();
    println!("{}", format_context(&results));

    if args.answer {
        let timeout = config.generation.request_timeout();
        let answer = tokio::time::timeout(timeout, services.chain.answer_from(&args.text, results))
            .await
            .map_err(|_| TesseraError::Timeout(timeout))??;
        println!();
        println!("{}", answer.answer);
    }
    Ok(())
}

fn run_delete(config: &TesseraConfig, args: &DeleteArgs) -> Result<(), TesseraError> {
    if args.ids.is_empty() && args.source_id.is_none() {
        return Err(TesseraError::InvalidInput(
            "provide record ids or --source-id".to_string(),
        ));
    }

    let services = build_services(config)?;
    let index = services.pipeline.index();
    let mut ids = args.ids.clone();
    if let Some(ref source_id) = args.source_id {
        ids.extend(index.ids_for_source(source_id)?);
    }

    let before = index.len();
    index.delete(&ids)?;
    println!(
        "{}",
        serde_json::json!({ "deleted": before - index.len(), "remaining": index.len() })
    );
    Ok(())
}

fn run_stats(config: &TesseraConfig) -> Result<(), TesseraError> {
    let services = build_services(config)?;
    let stats = serde_json::json!({
        "records": services.pipeline.index().len(),
        "fingerprints": services.pipeline.ledger().len()?,
        "dimensions": services.pipeline.index().dimensions(),
        "persistent": services.pipeline.index().is_persistent(),
        "data_dir": config.data_dir().display().to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();

    let (mut config, load_warning) = load_config(&cli);
    apply_overrides(&cli, &mut config);

    init_tracing(&config.general.log_level);
    if let Some(warning) = load_warning {
        tracing::warn!("{}", warning);
    }
    tracing::debug!("Starting Tessera v{}", env!("CARGO_PKG_VERSION"));

    config.validate()?;

    match cli.command {
        Command::Serve(ref args) => run_serve(config, args).await?,
        Command::Ingest(ref args) => run_ingest(&config, args).await?,
        Command::Query(ref args) => run_query(&config, args).await?,
        Command::Delete(ref args) => run_delete(&config, args)?,
        Command::Stats => run_stats(&config)?,
    }

    Ok(())
}
