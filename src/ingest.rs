//! Ingestion pipeline.
//!
//! Turns a list of file and directory paths into `knowledge` entries:
//! expand → filter → extract → hash → chunk → embed → replace.
//!
//! Each file is processed independently and yields exactly one
//! [`FileResult`], in input order. Files that are unsupported, oversized,
//! empty, or unchanged since the last run are `skipped`; files that fail
//! to parse or embed are `error` and recorded in the event log. Neither
//! stops the batch. A vector store failure does: it is returned as the
//! error of the whole call, since continuing would report work that was
//! never persisted.
//!
//! Re-ingesting a file whose raw bytes hash to the stored content hash is
//! a no-op, so repeated runs over the same inputs are idempotent.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use knowledge_router_core::chunk::chunk_text;
use knowledge_router_core::embedding::{embed_checked, Embedder};
use knowledge_router_core::models::{Entry, EntryMetadata, KNOWLEDGE};
use knowledge_router_core::store::{StoreError, VectorStore};

use crate::config::Config;
use crate::events::EventLog;
use crate::extract::{content_type_for, extract_text};
use crate::retrieval::ensure_model_identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Success,
    Skipped,
    Error,
}

/// Outcome for one input file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileResult {
    pub path: String,
    pub status: FileStatus,
    pub chunk_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl FileResult {
    fn success(path: &str, chunk_count: usize) -> Self {
        Self {
            path: path.to_string(),
            status: FileStatus::Success,
            chunk_count,
            detail: None,
        }
    }

    fn skipped(path: &str, reason: &str) -> Self {
        Self {
            path: path.to_string(),
            status: FileStatus::Skipped,
            chunk_count: 0,
            detail: Some(reason.to_string()),
        }
    }

    fn error(path: &str, detail: String) -> Self {
        Self {
            path: path.to_string(),
            status: FileStatus::Error,
            chunk_count: 0,
            detail: Some(detail),
        }
    }
}

/// Counts of `(success, skipped, error)` results.
pub fn summarize(results: &[FileResult]) -> (usize, usize, usize) {
    results.iter().fold((0, 0, 0), |(ok, skip, err), r| match r.status {
        FileStatus::Success => (ok + 1, skip, err),
        FileStatus::Skipped => (ok, skip + 1, err),
        FileStatus::Error => (ok, skip, err + 1),
    })
}

/// A file read and extracted, ready to chunk.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub text: String,
    pub content_type: &'static str,
    /// SHA-256 hex of the raw bytes.
    pub content_hash: String,
}

enum Candidate {
    File(PathBuf),
    Failed(PathBuf, String),
}

pub struct IngestPipeline {
    config: Arc<Config>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    events: Arc<EventLog>,
    skip_set: GlobSet,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|s| s.starts_with('.') && s != "." && s != "..")
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// `{content_hash[..16]}-{sha256(source)[..8]}-{index}`.
///
/// Stable across runs; byte-identical files at different paths get
/// different ids.
pub fn chunk_entry_id(content_hash: &str, source_key: &str, index: usize) -> String {
    let hash_prefix = content_hash.get(..16).unwrap_or(content_hash);
    let path_tag = sha256_hex(source_key.as_bytes());
    format!("{}-{}-{}", hash_prefix, &path_tag[..8], index)
}

impl IngestPipeline {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        events: Arc<EventLog>,
    ) -> Result<Self> {
        let skip_set = build_globset(&config.ingestion.skip_patterns)?;
        Ok(Self {
            config,
            store,
            embedder,
            events,
            skip_set,
        })
    }

    /// Ingest every file reachable from `paths`, in input order.
    pub async fn ingest(&self, paths: &[PathBuf]) -> Result<Vec<FileResult>> {
        ensure_model_identity(self.store.as_ref(), KNOWLEDGE, &self.embedder.model_id()).await?;

        let mut results = Vec::new();
        for input in paths {
            for candidate in self.expand(input) {
                let result = match candidate {
                    Candidate::File(path) => self.ingest_file(&path).await?,
                    Candidate::Failed(path, detail) => {
                        self.record_failure(&path, &detail).await;
                        FileResult::error(&path.display().to_string(), detail)
                    }
                };
                results.push(result);
            }
        }

        let (ok, skipped, errors) = summarize(&results);
        tracing::info!(ok, skipped, errors, "ingestion finished");
        Ok(results)
    }

    /// Expand one input path. Files stay as given; directories become
    /// their supported files, recursively and sorted.
    fn expand(&self, input: &Path) -> Vec<Candidate> {
        if !input.exists() {
            return vec![Candidate::Failed(
                input.to_path_buf(),
                "path not found".to_string(),
            )];
        }
        if !input.is_dir() {
            return vec![Candidate::File(input.to_path_buf())];
        }

        let ingestion = &self.config.ingestion;
        let walker = WalkDir::new(input)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !(ingestion.skip_hidden && is_hidden(e.file_name())));

        let mut out = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| input.to_path_buf());
                    out.push(Candidate::Failed(path, e.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(input).unwrap_or(path);
            if self.skip_set.is_match(relative) {
                continue;
            }
            if !ingestion.accepts(path) {
                continue;
            }
            out.push(Candidate::File(path.to_path_buf()));
        }
        out
    }

    /// Read and extract one file. Skips and per-file failures come back
    /// as their finished report line.
    async fn load(&self, path: &Path) -> std::result::Result<SourceDocument, FileResult> {
        let display = path.display().to_string();
        let ingestion = &self.config.ingestion;

        if !ingestion.accepts(path) {
            return Err(FileResult::skipped(&display, "unsupported type"));
        }

        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| FileResult::error(&display, format!("read failed: {e}")))?;
        if meta.len() > ingestion.max_file_bytes {
            return Err(FileResult::skipped(&display, "size exceeded"));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| FileResult::error(&display, format!("read failed: {e}")))?;
        let content_type = content_type_for(path);
        let text = extract_text(&bytes, content_type)
            .map_err(|e| FileResult::error(&display, e.to_string()))?;
        if text.trim().is_empty() {
            return Err(FileResult::skipped(&display, "empty file"));
        }

        Ok(SourceDocument {
            path: path.to_path_buf(),
            text,
            content_type,
            content_hash: sha256_hex(&bytes),
        })
    }

    async fn ingest_file(&self, path: &Path) -> std::result::Result<FileResult, StoreError> {
        let display_path = path.display().to_string();

        let doc = match self.load(path).await {
            Ok(doc) => doc,
            Err(result) => {
                if result.status == FileStatus::Error {
                    self.record_failure(path, result.detail.as_deref().unwrap_or_default())
                        .await;
                } else {
                    tracing::debug!(path = %display_path, reason = ?result.detail, "skipped");
                }
                return Ok(result);
            }
        };

        let source_key = std::fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string();

        let stored_hash = self.store.source_hash(KNOWLEDGE, &source_key).await?;
        if stored_hash.as_deref() == Some(doc.content_hash.as_str()) {
            tracing::debug!(path = %display_path, "unchanged");
            return Ok(FileResult::skipped(&display_path, "unchanged"));
        }

        let chunks = match chunk_text(&doc.content_hash, &doc.text, &self.config.chunking) {
            Ok(c) => c,
            Err(e) => {
                self.record_failure(path, &e.to_string()).await;
                return Ok(FileResult::error(&display_path, e.to_string()));
            }
        };

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = match self.embed_all(&texts).await {
            Ok(v) => v,
            Err(e) => {
                let detail = format!("embedding failed: {e:#}");
                self.record_failure(path, &detail).await;
                return Ok(FileResult::error(&display_path, detail));
            }
        };

        let model = self.embedder.model_id();
        let entries: Vec<Entry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let mut metadata = EntryMetadata::new(KNOWLEDGE, &model);
                metadata.source_file = Some(source_key.clone());
                metadata.chunk_index = Some(chunk.index);
                metadata.content_hash = Some(doc.content_hash.clone());
                metadata
                    .extra
                    .insert("content_type".into(), doc.content_type.into());
                Entry {
                    id: chunk_entry_id(&doc.content_hash, &source_key, chunk.index),
                    text: chunk.text,
                    vector,
                    metadata,
                }
            })
            .collect();

        let count = entries.len();
        self.store
            .replace_source(KNOWLEDGE, &source_key, &entries)
            .await?;
        tracing::info!(path = %display_path, chunks = count, "ingested");
        Ok(FileResult::success(&display_path, count))
    }

    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.embedding.batch_size.max(1)) {
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }

    /// One batch under the configured deadline, retried once after backoff.
    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let cfg = &self.config.embedding;
        let deadline = Duration::from_secs(cfg.timeout_secs);
        let mut last_err = None;

        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(cfg.retry_backoff_ms)).await;
            }
            let result =
                match tokio::time::timeout(deadline, embed_checked(self.embedder.as_ref(), batch))
                    .await
                {
                    Ok(r) => r,
                    Err(_) => Err(anyhow!(
                        "embedding batch timed out after {}s",
                        cfg.timeout_secs
                    )),
                };
            match result {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "embedding batch failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("embedding failed")))
    }

    async fn record_failure(&self, path: &Path, detail: &str) {
        tracing::warn!(path = %path.display(), detail, "ingestion failed for file");
        self.events
            .record(
                "ingest_error",
                &format!("{}: {}", path.display(), detail),
                Some("Check file format and content"),
            )
            .await;
    }
}
