//! Retrieval service: embed a query, ask the store, rank the results.
//!
//! Shared by `search_knowledge`, `search_memory`, `rag.search`, memory
//! recall, preference fallback, and router context hints. Also owns the
//! single-entry write path (`add_knowledge` / `add_memory`).
//!
//! Before any query or write, the configured embedder's model id is
//! compared with the ids recorded in the collection; vectors from two
//! different models are not comparable, so a mismatch is refused with
//! [`ServiceError::ModelMismatch`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use knowledge_router_core::embedding::{embed_checked, Embedder};
use knowledge_router_core::models::{Entry, EntryMetadata, KNOWLEDGE};
use knowledge_router_core::search::rank;
use knowledge_router_core::store::VectorStore;

use crate::error::ServiceError;

/// Keys owned by [`EntryMetadata`]; callers cannot set them through `extra`.
const RESERVED_KEYS: &[&str] = &[
    "source_file",
    "chunk_index",
    "collection",
    "timestamp",
    "model",
    "content_hash",
];

/// One search result. The vector is omitted.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: EntryMetadata,
}

/// The `rag.search` view of a knowledge hit.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkHit {
    pub text: String,
    pub path: Option<String>,
    pub idx: Option<usize>,
    pub score: f32,
}

/// Refuse to mix vectors from different embedding models in one collection.
pub async fn ensure_model_identity(
    store: &dyn VectorStore,
    collection: &str,
    model_id: &str,
) -> Result<()> {
    let models = store.models(collection).await?;
    if let Some(stored) = models.into_iter().find(|m| m != model_id) {
        return Err(ServiceError::ModelMismatch {
            collection: collection.to_string(),
            stored,
            configured: model_id.to_string(),
        }
        .into());
    }
    Ok(())
}

pub struct RetrievalService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    embed_timeout: Duration,
}

impl RetrievalService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            store,
            embedder,
            embed_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn model_id(&self) -> String {
        self.embedder.model_id()
    }

    /// Embed a single text under the embedding deadline.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let vectors = tokio::time::timeout(
            self.embed_timeout,
            embed_checked(self.embedder.as_ref(), &texts),
        )
        .await
        .map_err(|_| anyhow!("embedding timed out after {:?}", self.embed_timeout))??;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))
    }

    /// Top `k` entries of `collection` with similarity `>= min_score`.
    ///
    /// A blank query returns no results rather than an error.
    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        k: usize,
        min_score: f32,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        ensure_model_identity(self.store.as_ref(), collection, &self.model_id()).await?;

        let vector = self.embed_one(query).await?;
        let candidates = self.store.query(collection, &vector, k, min_score).await?;
        // Backends already rank; re-ranking pins the ordering contract here.
        let hits = rank(candidates, k, min_score)
            .into_iter()
            .map(|c| SearchHit {
                id: c.entry.id,
                text: c.entry.text,
                score: c.score,
                metadata: c.entry.metadata,
            })
            .collect::<Vec<_>>();

        tracing::debug!(collection, k, min_score, hits = hits.len(), "search");
        Ok(hits)
    }

    /// Knowledge hits reshaped as `{text, path, idx, score}`.
    pub async fn chunks(&self, query: &str, k: usize) -> Result<Vec<ChunkHit>> {
        let hits = self.search(KNOWLEDGE, query, k, -1.0).await?;
        Ok(hits
            .into_iter()
            .map(|h| ChunkHit {
                text: h.text,
                path: h.metadata.source_file,
                idx: h.metadata.chunk_index,
                score: h.score,
            })
            .collect())
    }

    /// Store one text under a fresh UUID and return the id.
    pub async fn add(
        &self,
        collection: &str,
        text: &str,
        metadata: Map<String, Value>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.put(collection, &id, text, metadata).await?;
        Ok(id)
    }

    /// Store one text under `id`, replacing any entry with that id.
    pub async fn put(
        &self,
        collection: &str,
        id: &str,
        text: &str,
        mut extra: Map<String, Value>,
    ) -> Result<Entry> {
        if text.trim().is_empty() {
            return Err(ServiceError::InvalidInput("text must not be empty".into()).into());
        }
        ensure_model_identity(self.store.as_ref(), collection, &self.model_id()).await?;

        let vector = self.embed_one(text).await?;
        let mut metadata = EntryMetadata::new(collection, &self.model_id());
        if let Some(Value::String(source)) = extra.get("source_file") {
            metadata.source_file = Some(source.clone());
        }
        for key in RESERVED_KEYS {
            extra.remove(*key);
        }
        metadata.extra = extra;

        let entry = Entry {
            id: id.to_string(),
            text: text.to_string(),
            vector,
            metadata,
        };
        self.store
            .upsert(collection, std::slice::from_ref(&entry))
            .await?;
        tracing::debug!(collection, id, "stored entry");
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_router_core::embedding::HashEmbedder;
    use knowledge_router_core::models::MEMORY;
    use knowledge_router_core::store::memory::InMemoryStore;

    fn service_with(store: Arc<InMemoryStore>, dims: usize) -> RetrievalService {
        RetrievalService::new(
            store,
            Arc::new(HashEmbedder::new(dims).unwrap()),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_add_then_search_ranks_relevant_first() {
        let service = service_with(Arc::new(InMemoryStore::new()), 384);
        service
            .add(KNOWLEDGE, "The deploy pipeline runs on Fridays", Map::new())
            .await
            .unwrap();
        let id = service
            .add(KNOWLEDGE, "Webhook signatures are validated with HMAC", Map::new())
            .await
            .unwrap();

        let hits = service
            .search(KNOWLEDGE, "webhook signature validation", 5, 0.0)
            .await
            .unwrap();
        assert_eq!(hits[0].id, id);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_search_respects_threshold_and_k() {
        let service = service_with(Arc::new(InMemoryStore::new()), 384);
        for text in ["alpha beta", "alpha gamma", "alpha delta", "unrelated words"] {
            service.add(MEMORY, text, Map::new()).await.unwrap();
        }
        let hits = service.search(MEMORY, "alpha", 2, 0.1).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.score >= 0.1));
    }

    #[tokio::test]
    async fn test_blank_query_and_empty_collection() {
        let service = service_with(Arc::new(InMemoryStore::new()), 64);
        assert!(service.search(KNOWLEDGE, "   ", 5, 0.0).await.unwrap().is_empty());
        assert!(service.search(KNOWLEDGE, "anything", 5, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_text_is_rejected() {
        let service = service_with(Arc::new(InMemoryStore::new()), 64);
        let err = service.add(MEMORY, "  ", Map::new()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ServiceError>(),
            Some(ServiceError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_reserved_metadata_keys_are_ignored() {
        let service = service_with(Arc::new(InMemoryStore::new()), 64);
        let mut extra = Map::new();
        extra.insert("model".into(), "spoofed".into());
        extra.insert("source_file".into(), "notes/a.md".into());
        extra.insert("topic".into(), "ops".into());
        let entry = service.put(MEMORY, "m-1", "keep this", extra).await.unwrap();
        assert_eq!(entry.metadata.model, "hash-trigram@64");
        assert_eq!(entry.metadata.source_file.as_deref(), Some("notes/a.md"));
        assert_eq!(entry.metadata.extra.len(), 1);
        assert_eq!(entry.metadata.extra["topic"], "ops");
    }

    #[tokio::test]
    async fn test_model_mismatch_is_refused() {
        let store = Arc::new(InMemoryStore::new());
        service_with(store.clone(), 64)
            .add(KNOWLEDGE, "indexed with the small model", Map::new())
            .await
            .unwrap();

        let other = service_with(store, 128);
        let err = other.search(KNOWLEDGE, "small model", 3, 0.0).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ServiceError>(),
            Some(ServiceError::ModelMismatch { .. })
        ));
        assert!(other.add(KNOWLEDGE, "more", Map::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_chunks_view_carries_path_and_index() {
        let service = service_with(Arc::new(InMemoryStore::new()), 64);
        let mut extra = Map::new();
        extra.insert("source_file".into(), "docs/guide.md".into());
        service
            .put(KNOWLEDGE, "k-1", "guide to retries", extra)
            .await
            .unwrap();
        let chunks = service.chunks("retries", 3).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].path.as_deref(), Some("docs/guide.md"));
        assert_eq!(chunks[0].idx, None);
    }
}
