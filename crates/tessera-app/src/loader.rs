//! Structured-input loaders for `tessera ingest`.
//!
//! Turns a CSV or JSON file into one `IngestRequest` per row or element,
//! so each row is fingerprinted, chunked and replaced independently.
//!
//! - CSV: each row becomes `header: value` lines. Metadata gets `source`
//!   (the input name) and `row` (0-based data row).
//! - JSON: a path such as `.[].body` or `.items[2].text` selects values;
//!   strings are ingested as-is, anything else as compact JSON. Metadata
//!   gets `source` and `seq_num` (1-based). JSON Lines applies the path
//!   to every line.

use std::io::Read;

use clap::ValueEnum;
use serde_json::Value;

use tessera_core::error::TesseraError;
use tessera_core::types::{IngestRequest, Metadata, MetadataValue};

pub const META_SOURCE: &str = "source";
pub const META_ROW: &str = "row";
pub const META_SEQ_NUM: &str = "seq_num";

/// How `tessera ingest` reads its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum InputFormat {
    /// The whole file is one document.
    #[default]
    Text,
    /// One document per data row.
    Csv,
    /// One document per value the JSON path selects.
    Json,
    /// Like `json`, applied to each line.
    Jsonl,
}

/// CSV parsing knobs.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: u8,
    /// Column names for header-less files. When set, the first line is data.
    pub fieldnames: Option<Vec<String>>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            fieldnames: None,
        }
    }
}

/// Load CSV rows as ingest requests.
///
/// `source` names the input; row `n` gets source id `<source>:row<n>`.
/// `base` metadata is copied onto every row before `source` and `row`.
pub fn load_csv<R: Read>(
    reader: R,
    source: &str,
    options: &CsvOptions,
    base: &Metadata,
) -> Result<Vec<IngestRequest>, TesseraError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(options.fieldnames.is_none())
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = match options.fieldnames {
        Some(ref names) => names.clone(),
        None => csv_reader
            .headers()
            .map_err(csv_error)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect(),
    };

    let mut requests = Vec::new();
    for (row, record) in csv_reader.records().enumerate() {
        let record = record.map_err(csv_error)?;
        let text = record
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let column = headers
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("column{}", i));
                format!("{}: {}", column, value.trim())
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut metadata = base.clone();
        metadata.insert(META_SOURCE.to_string(), MetadataValue::from(source));
        metadata.insert(META_ROW.to_string(), MetadataValue::from(row));
        requests.push(
            IngestRequest::new(format!("{}:row{}", source, row), text).with_metadata(metadata),
        );
    }

    tracing::debug!(source, rows = requests.len(), "CSV loaded");
    Ok(requests)
}

fn csv_error(err: csv::Error) -> TesseraError {
    TesseraError::InvalidInput(format!("CSV parse error: {}", err))
}

/// One step of a JSON path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathStep {
    Field(String),
    Index(usize),
    Each,
}

/// Parse a jq-style path: `.`, `.name`, `.a.b`, `.[]`, `.[].name`,
/// `.hobby[1]`, `.items[].text`.
fn parse_path(path: &str) -> Result<Vec<PathStep>, TesseraError> {
    let invalid = || TesseraError::InvalidInput(format!("invalid JSON path '{}'", path));
    let path = path.trim();
    let rest = path.strip_prefix('.').ok_or_else(invalid)?;

    let mut steps = Vec::new();
    let mut chars = rest.chars();
    let mut field = String::new();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !field.is_empty() {
                    steps.push(PathStep::Field(std::mem::take(&mut field)));
                }
            }
            '[' => {
                if !field.is_empty() {
                    steps.push(PathStep::Field(std::mem::take(&mut field)));
                }
                let mut inner = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) => inner.push(d),
                        None => return Err(invalid()),
                    }
                }
                let inner = inner.trim();
                if inner.is_empty() {
                    steps.push(PathStep::Each);
                } else {
                    steps.push(PathStep::Index(inner.parse().map_err(|_| invalid())?));
                }
            }
            ']' => return Err(invalid()),
            other => field.push(other),
        }
    }
    if !field.is_empty() {
        steps.push(PathStep::Field(field));
    }
    Ok(steps)
}

/// Apply path steps, flattening every `[]`. Missing keys select nothing.
fn select<'a>(value: &'a Value, steps: &[PathStep]) -> Vec<&'a Value> {
    let Some((step, rest)) = steps.split_first() else {
        return vec![value];
    };
    match (step, value) {
        (PathStep::Field(name), Value::Object(map)) => map
            .get(name)
            .map(|v| select(v, rest))
            .unwrap_or_default(),
        (PathStep::Index(i), Value::Array(items)) => {
            items.get(*i).map(|v| select(v, rest)).unwrap_or_default()
        }
        (PathStep::Each, Value::Array(items)) => {
            items.iter().flat_map(|v| select(v, rest)).collect()
        }
        (PathStep::Each, Value::Object(map)) => {
            map.values().flat_map(|v| select(v, rest)).collect()
        }
        _ => Vec::new(),
    }
}

fn value_text(value: &Value) -> Result<String, TesseraError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Ok(serde_json::to_string(other)?),
    }
}

/// Load values selected by `path` from a JSON document (or JSON Lines when
/// `lines` is set).
///
/// Element `n` (1-based) gets source id `<source>:<n>`. Null selections are
/// skipped but still count toward `seq_num`.
pub fn load_json<R: Read>(
    mut reader: R,
    source: &str,
    path: &str,
    lines: bool,
    base: &Metadata,
) -> Result<Vec<IngestRequest>, TesseraError> {
    let steps = parse_path(path)?;
    let mut content = String::new();
    reader.read_to_string(&mut content)?;

    let documents: Vec<Value> = if lines {
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?
    } else {
        vec![serde_json::from_str(&content)?]
    };

    let mut requests = Vec::new();
    let mut seq_num = 0usize;
    for document in &documents {
        for value in select(document, &steps) {
            seq_num += 1;
            if value.is_null() {
                continue;
            }
            let mut metadata = base.clone();
            metadata.insert(META_SOURCE.to_string(), MetadataValue::from(source));
            metadata.insert(META_SEQ_NUM.to_string(), MetadataValue::from(seq_num));
            requests.push(
                IngestRequest::new(format!("{}:{}", source, seq_num), value_text(value)?)
                    .with_metadata(metadata),
            );
        }
    }

    tracing::debug!(source, path, documents = requests.len(), "JSON loaded");
    Ok(requests)
}
