//! Core data models shared by the chunker, the stores, and the services.
//!
//! ```text
//! SourceDocument ──chunk_text()──▶ Vec<Chunk> ──embed──▶ Vec<Entry> ──▶ VectorStore
//! ```
//!
//! An [`Entry`] is the unit of storage: one piece of text, its vector,
//! and the metadata needed to trace it back to where it came from.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Collection that holds ingested document chunks.
pub const KNOWLEDGE: &str = "knowledge";
/// Collection that holds memories and preferences.
pub const MEMORY: &str = "memory";

/// A contiguous token window of a document.
///
/// `start_token..end_token` is a half-open span over the document's
/// whitespace-delimited tokens. `text` is the exact source slice from
/// the first token's first byte to the last token's last byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Content hash of the parent document.
    pub document_id: String,
    /// Zero-based position within the document.
    pub index: usize,
    pub start_token: usize,
    pub end_token: usize,
    pub text: String,
}

impl Chunk {
    /// Number of tokens covered by this chunk.
    pub fn token_count(&self) -> usize {
        self.end_token - self.start_token
    }
}

/// Metadata stored alongside every entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Path of the file the entry was ingested from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    pub collection: String,
    /// Unix timestamp (seconds) of the write.
    pub timestamp: i64,
    /// Embedding model identity (`name@dims`) that produced the vector.
    pub model: String,
    /// SHA-256 of the raw source bytes, for change detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Caller-supplied fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EntryMetadata {
    /// Metadata for an entry with no source file.
    pub fn new(collection: &str, model: &str) -> Self {
        Self {
            source_file: None,
            chunk_index: None,
            collection: collection.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            content_hash: None,
            extra: Map::new(),
        }
    }
}

/// A stored unit: text, its embedding, and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing, default)]
    pub vector: Vec<f32>,
    pub metadata: EntryMetadata,
}

/// An entry paired with its similarity to a query vector.
///
/// `seq` is the store's insertion order for the entry and is the
/// tie-breaker when two scores are equal.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: Entry,
    pub score: f32,
    pub seq: u64,
}
