//! Vector store abstraction.
//!
//! The [`VectorStore`] trait defines every storage operation the
//! ingestion, retrieval, and memory services need, over named
//! collections. Backends: the durable SQLite store in the app crate and
//! [`memory::InMemoryStore`] for tests.
//!
//! Implementations must be `Send + Sync` and must serialize writers per
//! collection: a write is either fully visible or not visible at all.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Entry, ScoredEntry};

/// Failures surfaced by a [`VectorStore`].
///
/// These are fatal to the calling operation; services do not retry them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid collection name '{0}': use lowercase letters, digits, '_' or '-'")]
    InvalidCollection(String),

    #[error(
        "vector for '{id}' has {actual} dims but collection '{collection}' stores {expected}"
    )]
    DimensionMismatch {
        collection: String,
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("vector store backend failure: {0}")]
    Backend(String),
}

/// Collection names become directory names, so keep them to `[a-z0-9_-]+`.
pub fn validate_collection(name: &str) -> Result<(), StoreError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidCollection(name.to_string()))
    }
}

/// Check every entry in a batch has the same width as `expected`
/// (or as the first entry when the collection is still empty).
pub fn check_dims(
    collection: &str,
    expected: Option<usize>,
    entries: &[Entry],
) -> Result<Option<usize>, StoreError> {
    let mut dims = expected;
    for e in entries {
        match dims {
            Some(d) if d != e.vector.len() => {
                return Err(StoreError::DimensionMismatch {
                    collection: collection.to_string(),
                    id: e.id.clone(),
                    expected: d,
                    actual: e.vector.len(),
                });
            }
            Some(_) => {}
            None => dims = Some(e.vector.len()),
        }
    }
    Ok(dims)
}

/// Abstract vector storage over named collections.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or replace entries by id |
/// | [`query`](VectorStore::query) | Top-k cosine similarity search |
/// | [`delete`](VectorStore::delete) | Remove entries by id |
/// | [`get`](VectorStore::get) | Fetch one entry by id |
/// | [`replace_source`](VectorStore::replace_source) | Atomically swap all entries of one source file |
/// | [`source_hash`](VectorStore::source_hash) | Content hash last stored for a source file |
/// | [`models`](VectorStore::models) | Distinct embedding model ids in a collection |
/// | [`count`](VectorStore::count) | Number of entries in a collection |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert entries, replacing any with the same id. Replaced entries
    /// keep their original insertion order.
    async fn upsert(&self, collection: &str, entries: &[Entry]) -> Result<(), StoreError>;

    /// Return at most `k` entries with similarity `>= min_score`, ordered
    /// by descending score, ties by insertion order.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredEntry>, StoreError>;

    /// Delete entries by id, returning how many existed.
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<usize, StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Entry>, StoreError>;

    /// Remove every entry whose `source_file` is `source_file` and insert
    /// `entries`, as one atomic write.
    async fn replace_source(
        &self,
        collection: &str,
        source_file: &str,
        entries: &[Entry],
    ) -> Result<(), StoreError>;

    async fn source_hash(
        &self,
        collection: &str,
        source_file: &str,
    ) -> Result<Option<String>, StoreError>;

    async fn models(&self, collection: &str) -> Result<Vec<String>, StoreError>;

    async fn count(&self, collection: &str) -> Result<usize, StoreError>;
}
