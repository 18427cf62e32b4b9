//! In-memory [`VectorStore`] implementation for tests.
//!
//! Uses a `HashMap` of collections behind one `std::sync::RwLock`, so
//! every write is atomic and writers are serialized. Query is
//! brute-force cosine similarity over the collection.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::models::{Entry, ScoredEntry};
use crate::search::{rank, score_entries};

use super::{check_dims, validate_collection, StoreError, VectorStore};

struct Row {
    seq: u64,
    entry: Entry,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, Vec<Row>>,
    next_seq: u64,
}

impl State {
    fn dims(&self, collection: &str) -> Option<usize> {
        self.collections
            .get(collection)
            .and_then(|rows| rows.first())
            .map(|r| r.entry.vector.len())
    }

    fn upsert_rows(&mut self, collection: &str, entries: &[Entry]) {
        let mut seq = self.next_seq;
        let rows = self.collections.entry(collection.to_string()).or_default();
        for e in entries {
            match rows.iter_mut().find(|r| r.entry.id == e.id) {
                Some(existing) => existing.entry = e.clone(),
                None => {
                    rows.push(Row {
                        seq,
                        entry: e.clone(),
                    });
                    seq += 1;
                }
            }
        }
        self.next_seq = seq;
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, collection: &str, entries: &[Entry]) -> Result<(), StoreError> {
        validate_collection(collection)?;
        let mut state = self.write()?;
        check_dims(collection, state.dims(collection), entries)?;
        state.upsert_rows(collection, entries);
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredEntry>, StoreError> {
        validate_collection(collection)?;
        let state = self.read()?;
        let rows = match state.collections.get(collection) {
            Some(rows) if !rows.is_empty() => rows,
            _ => return Ok(Vec::new()),
        };
        if let Some(expected) = state.dims(collection) {
            if expected != vector.len() {
                return Err(StoreError::DimensionMismatch {
                    collection: collection.to_string(),
                    id: "<query>".into(),
                    expected,
                    actual: vector.len(),
                });
            }
        }
        let scored = score_entries(vector, rows.iter().map(|r| (r.seq, r.entry.clone())));
        Ok(rank(scored, k, min_score))
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<usize, StoreError> {
        validate_collection(collection)?;
        let mut state = self.write()?;
        let Some(rows) = state.collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !ids.contains(&r.entry.id));
        Ok(before - rows.len())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Entry>, StoreError> {
        validate_collection(collection)?;
        let state = self.read()?;
        Ok(state
            .collections
            .get(collection)
            .and_then(|rows| rows.iter().find(|r| r.entry.id == id))
            .map(|r| r.entry.clone()))
    }

    async fn replace_source(
        &self,
        collection: &str,
        source_file: &str,
        entries: &[Entry],
    ) -> Result<(), StoreError> {
        validate_collection(collection)?;
        let mut state = self.write()?;
        let is_source = |r: &Row| r.entry.metadata.source_file.as_deref() == Some(source_file);
        let remaining_dims = state
            .collections
            .get(collection)
            .and_then(|rows| rows.iter().find(|r| !is_source(r)))
            .map(|r| r.entry.vector.len());
        check_dims(collection, remaining_dims, entries)?;
        if let Some(rows) = state.collections.get_mut(collection) {
            rows.retain(|r| !is_source(r));
        }
        state.upsert_rows(collection, entries);
        Ok(())
    }

    async fn source_hash(
        &self,
        collection: &str,
        source_file: &str,
    ) -> Result<Option<String>, StoreError> {
        validate_collection(collection)?;
        let state = self.read()?;
        Ok(state.collections.get(collection).and_then(|rows| {
            rows.iter()
                .filter(|r| r.entry.metadata.source_file.as_deref() == Some(source_file))
                .find_map(|r| r.entry.metadata.content_hash.clone())
        }))
    }

    async fn models(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        validate_collection(collection)?;
        let state = self.read()?;
        let mut models: Vec<String> = state
            .collections
            .get(collection)
            .map(|rows| rows.iter().map(|r| r.entry.metadata.model.clone()).collect())
            .unwrap_or_default();
        models.sort();
        models.dedup();
        Ok(models)
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        validate_collection(collection)?;
        let state = self.read()?;
        Ok(state.collections.get(collection).map_or(0, Vec::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryMetadata;

    fn entry(id: &str, vector: Vec<f32>, source: Option<&str>) -> Entry {
        let mut metadata = EntryMetadata::new("knowledge", "test@2");
        metadata.source_file = source.map(str::to_string);
        metadata.content_hash = source.map(|s| format!("hash-of-{s}"));
        Entry {
            id: id.to_string(),
            text: id.to_string(),
            vector,
            metadata,
        }
    }

    #[tokio::test]
    async fn test_query_orders_and_limits() {
        let store = InMemoryStore::new();
        store
            .upsert(
                "knowledge",
                &[
                    entry("far", vec![0.0, 1.0], None),
                    entry("near", vec![1.0, 0.1], None),
                    entry("exact", vec![1.0, 0.0], None),
                ],
            )
            .await
            .unwrap();

        let hits = store.query("knowledge", &[1.0, 0.0], 2, 0.0).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near"]);
    }

    #[tokio::test]
    async fn test_upsert_keeps_insertion_order_for_ties() {
        let store = InMemoryStore::new();
        store
            .upsert(
                "knowledge",
                &[entry("a", vec![1.0, 0.0], None), entry("b", vec![1.0, 0.0], None)],
            )
            .await
            .unwrap();
        // Re-upserting "a" must not move it behind "b".
        store
            .upsert("knowledge", &[entry("a", vec![1.0, 0.0], None)])
            .await
            .unwrap();

        let hits = store.query("knowledge", &[1.0, 0.0], 5, 0.0).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.count("knowledge").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_replace_source_swaps_entries() {
        let store = InMemoryStore::new();
        store
            .upsert(
                "knowledge",
                &[
                    entry("old-0", vec![1.0, 0.0], Some("a.md")),
                    entry("old-1", vec![1.0, 0.0], Some("a.md")),
                    entry("other", vec![1.0, 0.0], Some("b.md")),
                ],
            )
            .await
            .unwrap();

        store
            .replace_source("knowledge", "a.md", &[entry("new-0", vec![0.0, 1.0], Some("a.md"))])
            .await
            .unwrap();

        assert_eq!(store.count("knowledge").await.unwrap(), 2);
        assert!(store.get("knowledge", "old-0").await.unwrap().is_none());
        assert!(store.get("knowledge", "new-0").await.unwrap().is_some());
        assert_eq!(
            store.source_hash("knowledge", "a.md").await.unwrap().as_deref(),
            Some("hash-of-a.md")
        );
    }

    #[tokio::test]
    async fn test_delete_reports_removed() {
        let store = InMemoryStore::new();
        store
            .upsert("memory", &[entry("m1", vec![1.0, 0.0], None)])
            .await
            .unwrap();
        let removed = store
            .delete("memory", &["m1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count("memory").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let store = InMemoryStore::new();
        store
            .upsert("knowledge", &[entry("a", vec![1.0, 0.0], None)])
            .await
            .unwrap();
        let err = store
            .upsert("knowledge", &[entry("b", vec![1.0, 0.0, 0.0], None)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 2, actual: 3, .. }));
        assert!(store.query("knowledge", &[1.0], 1, 0.0).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_collection_queries_cleanly() {
        let store = InMemoryStore::new();
        assert!(store.query("memory", &[1.0], 3, 0.0).await.unwrap().is_empty());
        assert!(store.models("memory").await.unwrap().is_empty());
        assert!(matches!(
            store.count("Bad Name").await,
            Err(StoreError::InvalidCollection(_))
        ));
    }
}
