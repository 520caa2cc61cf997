//! CLI argument definitions for the Tessera application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use tessera_core::error::TesseraError;
use tessera_core::types::{Metadata, MetadataFilter, MetadataValue};

use crate::loader::{CsvOptions, InputFormat};

/// Tessera - content-addressed document ingestion and vector retrieval.
#[derive(Parser, Debug)]
#[command(name = "tessera", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding tessera.db.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Keep everything in memory; nothing is written to disk.
    #[arg(long = "ephemeral", global = true)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API server.
    Serve(ServeArgs),
    /// Ingest a text, CSV or JSON file.
    Ingest(IngestArgs),
    /// Retrieve context for a query, optionally generating an answer.
    Query(QueryArgs),
    /// Delete records by id or by source.
    Delete(DeleteArgs),
    /// Show record and ledger counts.
    Stats,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Address to bind.
    #[arg(long = "host")]
    pub host: Option<String>,
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// File to read. Use `-` for stdin.
    pub file: PathBuf,

    /// Source identifier; defaults to the file name.
    #[arg(short = 's', long = "source-id")]
    pub source_id: Option<String>,

    /// Extra metadata as key=value. Repeatable.
    #[arg(short = 'm', long = "meta", value_parser = parse_key_value)]
    pub meta: Vec<(String, MetadataValue)>,

    /// Input format. csv, json and jsonl yield one document per row or value.
    #[arg(long = "format", value_enum, default_value_t = InputFormat::Text)]
    pub format: InputFormat,

    /// Path selecting the values to ingest from JSON, e.g. `.[].body`.
    #[arg(long = "json-path", default_value = ".")]
    pub json_path: String,

    /// CSV field delimiter.
    #[arg(long = "delimiter", default_value_t = ',')]
    pub delimiter: char,

    /// CSV column names for files without a header row.
    #[arg(long = "fieldnames", value_delimiter = ',')]
    pub fieldnames: Vec<String>,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    pub text: String,

    /// Number of results.
    #[arg(short = 'k')]
    pub k: Option<usize>,

    /// Metadata equality filter as key=value. Repeatable.
    #[arg(short = 'f', long = "filter", value_parser = parse_key_value)]
    pub filter: Vec<(String, MetadataValue)>,

    /// Generate an answer from the retrieved context.
    #[arg(short = 'a', long = "answer")]
    pub answer: bool,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Record ids to delete.
    pub ids: Vec<String>,

    /// Delete every record of this source.
    #[arg(short = 's', long = "source-id")]
    pub source_id: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > TESSERA_CONFIG env var > platform default (~/.tessera/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("TESSERA_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory path.
    ///
    /// Priority: --data-dir flag > TESSERA_DATA_DIR env var > config file value.
    /// Returns `None` if neither is overridden (use config default).
    pub fn resolve_data_dir(&self) -> Option<String> {
        if let Some(ref p) = self.data_dir {
            return Some(p.to_string_lossy().to_string());
        }
        std::env::var("TESSERA_DATA_DIR").ok()
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > TESSERA_LOG_LEVEL env var > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        if let Some(ref level) = self.log_level {
            return level.clone();
        }
        if let Ok(level) = std::env::var("TESSERA_LOG_LEVEL") {
            return level;
        }
        config_level.to_string()
    }
}

impl ServeArgs {
    /// Resolve the API server port.
    ///
    /// Priority: --port flag > TESSERA_PORT env var > config file value > 3040.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Ok(val) = std::env::var("TESSERA_PORT") {
            if let Ok(p) = val.parse::<u16>() {
                return p;
            }
        }
        if config_port != 0 {
            return config_port;
        }
        3040
    }
}

impl IngestArgs {
    /// Source id for the document: explicit flag, else the file name.
    pub fn resolve_source_id(&self) -> String {
        if let Some(ref id) = self.source_id {
            return id.clone();
        }
        self.file
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "stdin".to_string())
    }

    pub fn metadata(&self) -> Metadata {
        self.meta.iter().cloned().collect()
    }

    pub fn csv_options(&self) -> Result<CsvOptions, TesseraError> {
        let delimiter = u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                TesseraError::InvalidInput(format!(
                    "CSV delimiter must be a single ASCII character, got '{}'",
                    self.delimiter
                ))
            })?;
        Ok(CsvOptions {
            delimiter,
            fieldnames: (!self.fieldnames.is_empty()).then(|| self.fieldnames.clone()),
        })
    }
}

impl QueryArgs {
    pub fn metadata_filter(&self) -> Option<MetadataFilter> {
        if self.filter.is_empty() {
            return None;
        }
        Some(MetadataFilter(self.filter.iter().cloned().collect()))
    }
}

/// Parse `key=value`, typing the value loosely.
fn parse_key_value(raw: &str) -> Result<(String, MetadataValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.to_string(), MetadataValue::parse_loose(value.trim())))
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".tessera").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".tessera").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("tessera").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_serve_with_globals() {
        let cli = parse(&["--ephemeral", "serve", "--port", "9000", "--log-level", "debug"]);
        assert!(cli.ephemeral);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Serve(ref serve) => assert_eq!(serve.resolve_port(3040), 9000),
            ref other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_ingest_metadata() {
        let cli = parse(&[
            "ingest",
            "notes/today.md",
            "--meta",
            "lang=en",
            "--meta",
            "page=3",
        ]);
        let Command::Ingest(args) = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(args.resolve_source_id(), "today.md");
        let metadata = args.metadata();
        assert_eq!(metadata.get("lang"), Some(&MetadataValue::from("en")));
        assert_eq!(metadata.get("page"), Some(&MetadataValue::Int(3)));
    }

    #[test]
    fn test_parse_ingest_csv_options() {
        let cli = parse(&[
            "ingest",
            "people.tsv",
            "--format",
            "csv",
            "--delimiter",
            ";",
            "--fieldnames",
            "name,age",
        ]);
        let Command::Ingest(args) = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(args.format, InputFormat::Csv);
        let options = args.csv_options().unwrap();
        assert_eq!(options.delimiter, b';');
        assert_eq!(
            options.fieldnames,
            Some(vec!["name".to_string(), "age".to_string()])
        );
    }

    #[test]
    fn test_ingest_defaults_to_text() {
        let cli = parse(&["ingest", "notes.md"]);
        let Command::Ingest(args) = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(args.format, InputFormat::Text);
        assert_eq!(args.json_path, ".");
        assert!(args.csv_options().unwrap().fieldnames.is_none());
    }

    #[test]
    fn test_non_ascii_delimiter_rejected() {
        let cli = parse(&["ingest", "x.csv", "--format", "csv", "--delimiter", "é"]);
        let Command::Ingest(args) = cli.command else {
            panic!("expected ingest");
        };
        assert!(matches!(
            args.csv_options(),
            Err(TesseraError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_parse_query_filter_and_k() {
        let cli = parse(&["query", "what is rust", "-k", "7", "--filter", "source_id=doc", "--answer"]);
        let Command::Query(args) = cli.command else {
            panic!("expected query");
        };
        assert_eq!(args.text, "what is rust");
        assert_eq!(args.k, Some(7));
        assert!(args.answer);
        let filter = args.metadata_filter().unwrap();
        assert_eq!(filter.0.get("source_id"), Some(&MetadataValue::from("doc")));
    }

    #[test]
    fn test_query_without_filter_has_none() {
        let cli = parse(&["query", "x"]);
        let Command::Query(args) = cli.command else {
            panic!("expected query");
        };
        assert!(args.metadata_filter().is_none());
    }

    #[test]
    fn test_parse_key_value_rejects_malformed() {
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
        assert_eq!(
            parse_key_value("flag=true").unwrap(),
            ("flag".to_string(), MetadataValue::Bool(true))
        );
    }

    #[test]
    fn test_explicit_flags_win() {
        let cli = parse(&["--config", "/tmp/t.toml", "--data-dir", "/tmp/data", "stats"]);
        assert_eq!(cli.resolve_config_path(), PathBuf::from("/tmp/t.toml"));
        assert_eq!(cli.resolve_data_dir().as_deref(), Some("/tmp/data"));
    }

    #[test]
    fn test_port_falls_back_to_config() {
        let serve = ServeArgs {
            port: None,
            host: None,
        };
        if std::env::var("TESSERA_PORT").is_err() {
            assert_eq!(serve.resolve_port(4100), 4100);
        }
    }
}
