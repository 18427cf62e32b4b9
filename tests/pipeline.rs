//! Library-level tests: ingestion, retrieval, memory, and routing wired
//! together over a SQLite store in a temp directory.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Map;
use tempfile::TempDir;

use knowledge_router::config::{default_config, Config};
use knowledge_router::error::ServiceError;
use knowledge_router::ingest::{chunk_entry_id, sha256_hex, FileResult, FileStatus};
use knowledge_router::memory::Lookup;
use knowledge_router::services::Services;
use knowledge_router::sqlite_store::SqliteStore;
use knowledge_router_core::embedding::{Embedder, EmbeddingProvider, HashEmbedder};
use knowledge_router_core::models::{KNOWLEDGE, MEMORY};
use knowledge_router_core::routing::RoutingStrategy;

fn test_config(dir: &Path) -> Config {
    let mut config = default_config(&dir.join("data"));
    config.embedding.retry_backoff_ms = 1;
    config
}

fn services_with(dir: &Path, embedder: Arc<dyn Embedder>) -> Services {
    let config = test_config(dir);
    let store = Arc::new(SqliteStore::new(&config.store.root));
    Services::with_parts(config, store, embedder, None).unwrap()
}

fn services(dir: &Path) -> Services {
    services_with(dir, Arc::new(HashEmbedder::new(384).unwrap()))
}

fn status_of<'a>(results: &'a [FileResult], name: &str) -> &'a FileResult {
    results
        .iter()
        .find(|r| r.path.ends_with(name))
        .unwrap_or_else(|| panic!("no result for {name}: {results:?}"))
}

fn numbered_words(n: usize) -> String {
    (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
}

#[tokio::test]
async fn thousand_token_document_yields_four_chunks() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("long.txt");
    fs::write(&file, numbered_words(1000)).unwrap();

    let services = services(tmp.path());
    let results = services.pipeline.ingest(&[file]).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, FileStatus::Success);
    assert_eq!(results[0].chunk_count, 4);
    assert_eq!(services.store.count(KNOWLEDGE).await.unwrap(), 4);
}

#[tokio::test]
async fn reingesting_unchanged_files_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(docs.join("a.md"), "# Retries\n\nRetry with exponential backoff.").unwrap();
    fs::write(docs.join("b.txt"), "Webhook signatures are validated with HMAC.").unwrap();

    let services = services(tmp.path());
    let first = services.pipeline.ingest(&[docs.clone()]).await.unwrap();
    assert!(first.iter().all(|r| r.status == FileStatus::Success));
    let count = services.store.count(KNOWLEDGE).await.unwrap();
    let hits = services
        .retrieval
        .search(KNOWLEDGE, "webhook signatures", 5, 0.3)
        .await
        .unwrap();

    let second = services.pipeline.ingest(&[docs]).await.unwrap();
    assert_eq!(second.len(), first.len());
    for r in &second {
        assert_eq!(r.status, FileStatus::Skipped);
        assert_eq!(r.detail.as_deref(), Some("unchanged"));
    }
    assert_eq!(services.store.count(KNOWLEDGE).await.unwrap(), count);
    let again = services
        .retrieval
        .search(KNOWLEDGE, "webhook signatures", 5, 0.3)
        .await
        .unwrap();
    let ids = |h: &[knowledge_router::retrieval::SearchHit]| {
        h.iter().map(|x| x.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&hits), ids(&again));
}

#[tokio::test]
async fn changed_file_replaces_its_old_chunks() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("notes.txt");
    fs::write(&file, numbered_words(1000)).unwrap();

    let services = services(tmp.path());
    services.pipeline.ingest(&[file.clone()]).await.unwrap();
    assert_eq!(services.store.count(KNOWLEDGE).await.unwrap(), 4);

    fs::write(&file, "A much shorter replacement note.").unwrap();
    let results = services.pipeline.ingest(&[file]).await.unwrap();
    assert_eq!(results[0].status, FileStatus::Success);
    assert_eq!(results[0].chunk_count, 1);
    assert_eq!(services.store.count(KNOWLEDGE).await.unwrap(), 1);
}

#[tokio::test]
async fn bad_files_do_not_stop_the_batch() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    fs::create_dir_all(docs.join(".git")).unwrap();
    fs::write(docs.join("bad.pdf"), b"not a valid pdf").unwrap();
    fs::write(docs.join("broken.json"), "{ nope").unwrap();
    fs::write(docs.join("empty.txt"), "").unwrap();
    fs::write(docs.join("good.md"), "# Good\n\nThis one is fine.").unwrap();
    fs::write(docs.join("notes.bin"), [0u8, 1, 2]).unwrap();
    fs::write(docs.join(".hidden.md"), "hidden").unwrap();
    fs::write(docs.join(".git").join("HEAD.md"), "ref").unwrap();
    let explicit_bin = docs.join("notes.bin");
    let missing = tmp.path().join("missing.md");

    let services = services(tmp.path());
    let results = services
        .pipeline
        .ingest(&[docs, explicit_bin, missing])
        .await
        .unwrap();

    let names: Vec<&str> = results
        .iter()
        .map(|r| r.path.rsplit(['/', '\\']).next().unwrap_or_default())
        .collect();
    assert_eq!(
        names,
        vec!["bad.pdf", "broken.json", "empty.txt", "good.md", "notes.bin", "missing.md"]
    );

    assert_eq!(status_of(&results, "bad.pdf").status, FileStatus::Error);
    assert_eq!(status_of(&results, "broken.json").status, FileStatus::Error);
    assert_eq!(
        status_of(&results, "empty.txt").detail.as_deref(),
        Some("empty file")
    );
    assert_eq!(status_of(&results, "good.md").status, FileStatus::Success);
    assert_eq!(
        status_of(&results, "notes.bin").detail.as_deref(),
        Some("unsupported type")
    );
    assert_eq!(status_of(&results, "missing.md").status, FileStatus::Error);

    let events = services.events.recent(10).await.unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.event == "ingest_error"));
    assert!(events.iter().all(|e| e.hint == "Check file format and content"));
}

#[tokio::test]
async fn oversized_files_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("big.txt");
    fs::write(&file, "x".repeat(2048)).unwrap();

    let mut config = test_config(tmp.path());
    config.ingestion.max_file_bytes = 1024;
    let store = Arc::new(SqliteStore::new(&config.store.root));
    let services =
        Services::with_parts(config, store, Arc::new(HashEmbedder::new(64).unwrap()), None)
            .unwrap();

    let results = services.pipeline.ingest(&[file]).await.unwrap();
    assert_eq!(results[0].status, FileStatus::Skipped);
    assert_eq!(results[0].detail.as_deref(), Some("size exceeded"));
}

struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }
    fn dims(&self) -> usize {
        8
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("connection refused")
    }
}

#[tokio::test]
async fn embedder_failure_is_a_per_file_error() {
    let tmp = TempDir::new().unwrap();
    let a = tmp.path().join("a.md");
    let b = tmp.path().join("b.md");
    fs::write(&a, "first").unwrap();
    fs::write(&b, "second").unwrap();

    let services = services_with(tmp.path(), Arc::new(FailingEmbedder));
    let results = services.pipeline.ingest(&[a, b]).await.unwrap();
    assert_eq!(results.len(), 2);
    for r in &results {
        assert_eq!(r.status, FileStatus::Error);
        assert!(r.detail.as_deref().unwrap_or_default().contains("embedding failed"));
    }
    assert_eq!(services.store.count(KNOWLEDGE).await.unwrap(), 0);
}

/// Fails the first call, succeeds afterwards.
struct FlakyEmbedder {
    calls: AtomicUsize,
}

impl EmbeddingProvider for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "flaky"
    }
    fn dims(&self) -> usize {
        8
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            bail!("503 service unavailable");
        }
        Ok(vec![vec![0.5; 8]; texts.len()])
    }
}

#[tokio::test]
async fn embedding_is_retried_once_after_a_failure() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("a.md");
    fs::write(&file, "Retry this embedding call.").unwrap();

    let embedder = Arc::new(FlakyEmbedder {
        calls: AtomicUsize::new(0),
    });
    let services = services_with(tmp.path(), embedder.clone());
    let results = services.pipeline.ingest(&[file]).await.unwrap();
    assert_eq!(results[0].status, FileStatus::Success);
    assert_eq!(results[0].chunk_count, 1);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    assert_eq!(services.store.count(KNOWLEDGE).await.unwrap(), 1);
}

/// Hangs on any batch mentioning "slow".
struct SlowEmbedder;

impl EmbeddingProvider for SlowEmbedder {
    fn model_name(&self) -> &str {
        "slow"
    }
    fn dims(&self) -> usize {
        8
    }
}

#[async_trait]
impl Embedder for SlowEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains("slow")) {
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
        Ok(vec![vec![0.5; 8]; texts.len()])
    }
}

#[tokio::test]
async fn embedding_timeout_is_a_per_file_error() {
    let tmp = TempDir::new().unwrap();
    let fast = tmp.path().join("fast.md");
    let slow = tmp.path().join("slow.md");
    let other = tmp.path().join("other.md");
    fs::write(&fast, "quick content").unwrap();
    fs::write(&slow, "this one is slow").unwrap();
    fs::write(&other, "more quick content").unwrap();

    let mut config = test_config(tmp.path());
    config.embedding.timeout_secs = 1;
    let store = Arc::new(SqliteStore::new(&config.store.root));
    let services = Services::with_parts(config, store, Arc::new(SlowEmbedder), None).unwrap();

    let results = services
        .pipeline
        .ingest(&[fast, slow, other])
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(status_of(&results, "fast.md").status, FileStatus::Success);
    assert_eq!(status_of(&results, "other.md").status, FileStatus::Success);
    let slow_result = status_of(&results, "slow.md");
    assert_eq!(slow_result.status, FileStatus::Error);
    assert!(slow_result
        .detail
        .as_deref()
        .unwrap_or_default()
        .contains("timed out"));
    assert_eq!(services.store.count(KNOWLEDGE).await.unwrap(), 2);

    let events = services.events.recent(10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].detail.contains("slow.md"));
}

#[tokio::test]
async fn ingested_entry_ids_carry_content_hash_and_path_tag() {
    let tmp = TempDir::new().unwrap();
    let a = tmp.path().join("a.md");
    let copy = tmp.path().join("copy.md");
    let body = "Webhook signatures are validated with HMAC.";
    fs::write(&a, body).unwrap();
    fs::write(&copy, body).unwrap();

    let services = services(tmp.path());
    services
        .pipeline
        .ingest(&[a.clone(), copy.clone()])
        .await
        .unwrap();
    assert_eq!(services.store.count(KNOWLEDGE).await.unwrap(), 2);

    let hash = sha256_hex(body.as_bytes());
    for path in [&a, &copy] {
        let key = fs::canonicalize(path).unwrap().display().to_string();
        let id = chunk_entry_id(&hash, &key, 0);
        assert!(id.starts_with(&hash[..16]));
        let entry = services.store.get(KNOWLEDGE, &id).await.unwrap().unwrap();
        assert_eq!(entry.metadata.source_file.as_deref(), Some(key.as_str()));
    }
}

#[tokio::test]
async fn switching_embedding_models_is_refused() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("a.md");
    fs::write(&file, "Indexed with the default model.").unwrap();

    services(tmp.path())
        .pipeline
        .ingest(&[file.clone()])
        .await
        .unwrap();

    let other = services_with(tmp.path(), Arc::new(HashEmbedder::new(128).unwrap()));
    let err = other.pipeline.ingest(&[file]).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ServiceError>(),
        Some(ServiceError::ModelMismatch { .. })
    ));
    let err = other
        .retrieval
        .search(KNOWLEDGE, "default model", 3, 0.0)
        .await
        .unwrap_err();
    assert!(err.downcast_ref::<ServiceError>().is_some());
}

#[tokio::test]
async fn memory_recall_above_threshold() {
    let tmp = TempDir::new().unwrap();
    let services = services(tmp.path());
    services
        .memory
        .add("Remember to validate webhook signatures", Map::new())
        .await
        .unwrap();
    services
        .memory
        .add("Lunch order is on Thursdays", Map::new())
        .await
        .unwrap();

    let hits = services
        .memory
        .search("webhook signature validation", 3)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "Remember to validate webhook signatures");
    assert!(hits[0].score >= 0.3);
    assert_eq!(services.store.count(MEMORY).await.unwrap(), 2);
}

#[tokio::test]
async fn preferences_survive_a_restart() {
    let tmp = TempDir::new().unwrap();
    {
        let services = services(tmp.path());
        services
            .memory
            .store_preference("test_framework", "pytest")
            .await
            .unwrap();
    }
    let services = services(tmp.path());
    let pref = services
        .memory
        .retrieve_preference("test_framework")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pref.key, "test_framework");
    assert_eq!(pref.value, "pytest");
    assert_eq!(pref.lookup, Lookup::Exact);
    assert_eq!(pref.score, 1.0);
}

#[tokio::test]
async fn routing_uses_rules_without_reasoner() {
    let tmp = TempDir::new().unwrap();
    let services = services(tmp.path());
    let result = services
        .router
        .route("Write comprehensive unit tests for the login module", &Map::new())
        .await;
    assert_eq!(result.agent, "tests");
    assert!((result.confidence - 0.7).abs() < 1e-6);
    assert_eq!(result.strategy, RoutingStrategy::Rules);
}
