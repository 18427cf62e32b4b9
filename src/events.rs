//! Append-only JSONL event log.
//!
//! One JSON object per line: `{timestamp, event, detail, hint}`. The log
//! records per-file ingestion failures, reasoning fallbacks, and anything
//! callers send through the `memory.log` tool. It is never rewritten.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub event: String,
    pub detail: String,
    #[serde(default)]
    pub hint: String,
}

pub struct EventLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, event: &str, detail: &str, hint: Option<&str>) -> Result<Event> {
        let entry = Event {
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event: event.to_string(),
            detail: detail.to_string(),
            hint: hint.unwrap_or_default().to_string(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open event log: {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(entry)
    }

    /// Append, logging instead of failing. For recording failures on
    /// paths that must not fail themselves.
    pub async fn record(&self, event: &str, detail: &str, hint: Option<&str>) {
        if let Err(e) = self.append(event, detail, hint).await {
            tracing::warn!(error = %e, event, "failed to write event log");
        }
    }

    /// The last `limit` events, newest first. Malformed lines are skipped.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Event>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read event log: {}", self.path.display()))
            }
        };

        Ok(content
            .lines()
            .rev()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str::<Event>(l).ok())
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_and_recent_newest_first() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new(&dir.path().join("nested").join("events.jsonl"));
        log.append("first", "one", None).await.unwrap();
        log.append("second", "two", Some("try again")).await.unwrap();
        log.append("third", "three", None).await.unwrap();

        let recent = log.recent(2).await.unwrap();
        let names: Vec<_> = recent.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(names, vec!["third", "second"]);
        assert_eq!(recent[1].hint, "try again");
    }

    #[tokio::test]
    async fn test_recent_skips_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(
            &path,
            "{\"timestamp\":\"t\",\"event\":\"ok\",\"detail\":\"d\"}\nnot json\n\n",
        )
        .unwrap();
        let log = EventLog::new(&path);
        let recent = log.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].event, "ok");
        assert_eq!(recent[0].hint, "");
    }

    #[tokio::test]
    async fn test_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new(&dir.path().join("none.jsonl"));
        assert!(log.recent(5).await.unwrap().is_empty());
    }
}
