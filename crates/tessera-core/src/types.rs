use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::TesseraError;

// =============================================================================
// Metadata
// =============================================================================

/// A scalar metadata value attached to a vector record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Int(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        MetadataValue::Int(value as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl MetadataValue {
    /// Parse a loosely-typed value as typed on a command line.
    ///
    /// `true`/`false` become booleans, integers and floats become numbers,
    /// anything else stays a string.
    pub fn parse_loose(raw: &str) -> Self {
        if let Ok(b) = raw.parse::<bool>() {
            return MetadataValue::Bool(b);
        }
        if let Ok(i) = raw.parse::<i64>() {
            return MetadataValue::Int(i);
        }
        if let Ok(x) = raw.parse::<f64>() {
            if x.is_finite() {
                return MetadataValue::Float(x);
            }
        }
        MetadataValue::String(raw.to_string())
    }
}

/// Key/value metadata on a record. Keys are unique; order is irrelevant.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Exact-match predicate over metadata keys.
///
/// A record matches when every filter key is present in its metadata with
/// an equal value. An empty filter matches everything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(pub Metadata);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required key/value pair.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `metadata` satisfies every clause of this filter.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.0
            .iter()
            .all(|(key, want)| metadata.get(key) == Some(want))
    }
}

impl From<Metadata> for MetadataFilter {
    fn from(value: Metadata) -> Self {
        MetadataFilter(value)
    }
}

// =============================================================================
// Fingerprints
// =============================================================================

/// SHA-256 content digest used as the deduplication key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint raw text after line-ending normalization.
    ///
    /// CRLF and lone CR become LF so the same document uploaded from
    /// different platforms hashes identically. Nothing else is altered.
    pub fn of_text(text: &str) -> Self {
        let normalized = normalize_line_endings(text);
        Self::of_bytes(normalized.as_bytes())
    }

    /// Fingerprint bytes exactly as given.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Fingerprint(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form, as persisted in the ledger.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

fn normalize_line_endings(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

impl FromStr for Fingerprint {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| TesseraError::InvalidInput(format!("bad fingerprint hex: {}", e)))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            TesseraError::InvalidInput(format!("fingerprint must be 32 bytes, got {}", v.len()))
        })?;
        Ok(Fingerprint(arr))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One entry in the deduplication ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub hash: Fingerprint,
    pub seen_at: DateTime<Utc>,
}

// =============================================================================
// Chunks, records, results
// =============================================================================

/// A bounded-size segment of a source document.
///
/// Offsets count characters, not bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_id: String,
    pub ordinal: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Chunk {
    /// Length of the chunk in characters.
    pub fn char_len(&self) -> usize {
        self.end_offset - self.start_offset
    }

    /// Identifier used for the chunk's vector record.
    pub fn record_id(&self) -> String {
        format!("{}#{}", self.source_id, self.ordinal)
    }
}

/// A stored embedding together with the text it was derived from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A scored match returned by a similarity search.
///
/// `score` is cosine similarity: higher means closer, range [-1, 1].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub record: VectorRecord,
    pub score: f64,
}

/// A document submitted for ingestion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub source_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl IngestRequest {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Outcome of one ingestion call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub chunks_ingested: usize,
    pub duplicate: bool,
}

impl IngestSummary {
    pub fn duplicate() -> Self {
        Self {
            chunks_ingested: 0,
            duplicate: true,
        }
    }

    pub fn ingested(chunks: usize) -> Self {
        Self {
            chunks_ingested: chunks,
            duplicate: false,
        }
    }
}
