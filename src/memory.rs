//! Memory and preference store.
//!
//! Memories are free-text entries in the `memory` collection, recalled
//! by similarity. Preferences live in the same collection under a
//! deterministic id derived from the key, so a write replaces the
//! previous value and an exact lookup is a single `get`.
//!
//! Retrieval is two-tiered and says which tier answered:
//! 1. **exact**: the entry stored under the key's id.
//! 2. **semantic**: otherwise, the closest memory to the key text with
//!    similarity at or above the configured threshold.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};

use knowledge_router_core::models::{Entry, MEMORY};

use crate::error::ServiceError;
use crate::ingest::sha256_hex;
use crate::retrieval::{RetrievalService, SearchHit};

/// Which lookup tier produced a preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lookup {
    Exact,
    Semantic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreferenceEntry {
    pub key: String,
    pub value: String,
    /// Unix seconds of the write.
    pub timestamp: i64,
    pub lookup: Lookup,
    /// 1.0 for exact hits, the similarity for semantic ones.
    pub score: f32,
}

/// Stable entry id for a preference key.
pub fn preference_id(key: &str) -> String {
    format!("pref-{}", &sha256_hex(key.as_bytes())[..32])
}

/// `key` fills in for entries that carry no preference key of their own,
/// such as a plain memory matched by the semantic fallback.
fn preference_from_entry(
    entry: &Entry,
    key: &str,
    lookup: Lookup,
    score: f32,
) -> PreferenceEntry {
    let field = |name: &str| {
        entry
            .metadata
            .extra
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    PreferenceEntry {
        key: field("key").unwrap_or_else(|| key.to_string()),
        value: field("value").unwrap_or_else(|| entry.text.clone()),
        timestamp: entry.metadata.timestamp,
        lookup,
        score,
    }
}

pub struct MemoryStore {
    retrieval: Arc<RetrievalService>,
    similarity_threshold: f32,
}

impl MemoryStore {
    pub fn new(retrieval: Arc<RetrievalService>, similarity_threshold: f32) -> Self {
        Self {
            retrieval,
            similarity_threshold,
        }
    }

    pub async fn add(&self, text: &str, metadata: Map<String, Value>) -> Result<String> {
        self.retrieval.add(MEMORY, text, metadata).await
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.retrieval
            .search(MEMORY, query, k, self.similarity_threshold)
            .await
    }

    /// Store `value` under `key`, replacing any previous value.
    pub async fn store_preference(&self, key: &str, value: &str) -> Result<PreferenceEntry> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ServiceError::InvalidInput("preference key must not be empty".into()).into());
        }

        let mut extra = Map::new();
        extra.insert("kind".into(), "preference".into());
        extra.insert("key".into(), key.into());
        extra.insert("value".into(), value.into());

        let entry = self
            .retrieval
            .put(MEMORY, &preference_id(key), &format!("{key}: {value}"), extra)
            .await?;
        tracing::info!(key, "preference stored");
        Ok(preference_from_entry(&entry, key, Lookup::Exact, 1.0))
    }

    /// Exact lookup by key, falling back to similarity search.
    pub async fn retrieve_preference(&self, key: &str) -> Result<Option<PreferenceEntry>> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ServiceError::InvalidInput("preference key must not be empty".into()).into());
        }

        if let Some(entry) = self
            .retrieval
            .store()
            .get(MEMORY, &preference_id(key))
            .await?
        {
            return Ok(Some(preference_from_entry(&entry, key, Lookup::Exact, 1.0)));
        }

        let hits = self
            .retrieval
            .search(MEMORY, key, 1, self.similarity_threshold)
            .await?;
        Ok(hits.into_iter().next().map(|hit| {
            tracing::debug!(key, matched = %hit.id, score = hit.score, "semantic preference match");
            let entry = Entry {
                id: hit.id,
                text: hit.text,
                vector: Vec::new(),
                metadata: hit.metadata,
            };
            preference_from_entry(&entry, key, Lookup::Semantic, hit.score)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_router_core::embedding::HashEmbedder;
    use knowledge_router_core::store::memory::InMemoryStore;
    use std::time::Duration;

    fn memory() -> MemoryStore {
        let retrieval = RetrievalService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(HashEmbedder::new(384).unwrap()),
            Duration::from_secs(5),
        );
        MemoryStore::new(Arc::new(retrieval), 0.3)
    }

    #[test]
    fn test_preference_id_is_stable() {
        assert_eq!(preference_id("indent_style"), preference_id("indent_style"));
        assert_ne!(preference_id("indent_style"), preference_id("indent_size"));
        assert_eq!(preference_id("x").len(), "pref-".len() + 32);
    }

    #[tokio::test]
    async fn test_exact_preference_roundtrip() {
        let memory = memory();
        memory.store_preference("indent_style", "spaces").await.unwrap();
        let pref = memory.retrieve_preference("indent_style").await.unwrap().unwrap();
        assert_eq!(pref.value, "spaces");
        assert_eq!(pref.lookup, Lookup::Exact);
        assert_eq!(pref.score, 1.0);
    }

    #[tokio::test]
    async fn test_latest_write_wins() {
        let memory = memory();
        memory.store_preference("theme", "light").await.unwrap();
        memory.store_preference("theme", "dark").await.unwrap();
        let pref = memory.retrieve_preference("theme").await.unwrap().unwrap();
        assert_eq!(pref.value, "dark");
    }

    #[tokio::test]
    async fn test_semantic_fallback_reports_score() {
        let memory = memory();
        memory.store_preference("editor.theme", "dark").await.unwrap();
        let pref = memory.retrieve_preference("editor theme").await.unwrap().unwrap();
        assert_eq!(pref.lookup, Lookup::Semantic);
        assert_eq!(pref.key, "editor.theme");
        assert_eq!(pref.value, "dark");
        assert!(pref.score >= 0.3 && pref.score < 1.0);
    }

    #[tokio::test]
    async fn test_unknown_preference_is_none() {
        let memory = memory();
        memory.store_preference("indent.style", "spaces").await.unwrap();
        assert!(memory.retrieve_preference("deploy window").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_recall_above_threshold() {
        let memory = memory();
        memory
            .add("Remember to validate webhook signatures", Map::new())
            .await
            .unwrap();
        memory
            .add("The deploy pipeline runs on Fridays", Map::new())
            .await
            .unwrap();
        let hits = memory.search("webhook signature validation", 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "Remember to validate webhook signatures");
    }

    #[tokio::test]
    async fn test_semantic_match_on_plain_memory_keeps_queried_key() {
        let memory = memory();
        memory
            .add("Remember to validate webhook signatures", Map::new())
            .await
            .unwrap();
        let pref = memory
            .retrieve_preference("webhook signature validation")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pref.lookup, Lookup::Semantic);
        assert_eq!(pref.key, "webhook signature validation");
        assert_eq!(pref.value, "Remember to validate webhook signatures");
    }

    #[tokio::test]
    async fn test_blank_key_rejected() {
        let memory = memory();
        assert!(memory.store_preference(" ", "x").await.is_err());
        assert!(memory.retrieve_preference("").await.is_err());
    }
}
