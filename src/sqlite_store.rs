//! SQLite-backed [`VectorStore`].
//!
//! One database per collection at `<root>/<collection>/store.sqlite`, in
//! WAL mode. Every write runs in a single transaction, so readers never
//! observe a partially applied batch and a crash leaves only committed
//! entries behind. Writers are additionally serialized per collection by
//! an async mutex; readers go straight to the pool.
//!
//! Query is brute-force cosine similarity over every stored vector,
//! ranked with [`knowledge_router_core::search::rank`].

use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;

use knowledge_router_core::embedding::{blob_to_vec, vec_to_blob};
use knowledge_router_core::models::{Entry, EntryMetadata, ScoredEntry};
use knowledge_router_core::search::{rank, score_entries};
use knowledge_router_core::store::{check_dims, validate_collection, StoreError, VectorStore};

use crate::{db, migrate};

fn backend(e: impl Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

struct CollectionDb {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

/// Durable vector store rooted at a directory.
pub struct SqliteStore {
    root: PathBuf,
    collections: Mutex<HashMap<String, Arc<CollectionDb>>>,
}

impl SqliteStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            collections: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open (and migrate) a collection on first use.
    async fn open(&self, collection: &str) -> Result<Arc<CollectionDb>, StoreError> {
        validate_collection(collection)?;
        let mut collections = self.collections.lock().await;
        if let Some(handle) = collections.get(collection) {
            return Ok(handle.clone());
        }

        let path = db::collection_path(&self.root, collection);
        let pool = db::connect(&path)
            .await
            .map_err(|e| backend(format!("opening {}: {e:#}", path.display())))?;
        migrate::run_migrations(&pool)
            .await
            .map_err(|e| backend(format!("migrating {}: {e:#}", path.display())))?;
        tracing::debug!(collection, path = %path.display(), "opened collection");

        let handle = Arc::new(CollectionDb {
            pool,
            write_lock: Mutex::new(()),
        });
        collections.insert(collection.to_string(), handle.clone());
        Ok(handle)
    }

    /// Close every open pool, flushing the WAL.
    pub async fn close(&self) {
        let mut collections = self.collections.lock().await;
        for (_, handle) in collections.drain() {
            handle.pool.close().await;
        }
    }
}

async fn stored_dims(
    tx: &mut Transaction<'_, Sqlite>,
    exclude_source: Option<&str>,
) -> Result<Option<usize>, StoreError> {
    let row = match exclude_source {
        Some(source) => {
            sqlx::query(
                "SELECT dims FROM entries WHERE source_file IS NULL OR source_file != ? LIMIT 1",
            )
            .bind(source)
            .fetch_optional(&mut **tx)
            .await
        }
        None => {
            sqlx::query("SELECT dims FROM entries LIMIT 1")
                .fetch_optional(&mut **tx)
                .await
        }
    }
    .map_err(backend)?;
    Ok(row.map(|r| r.get::<i64, _>("dims") as usize))
}

async fn insert_entries(
    tx: &mut Transaction<'_, Sqlite>,
    entries: &[Entry],
) -> Result<(), StoreError> {
    for e in entries {
        let metadata_json = serde_json::to_string(&e.metadata.extra).map_err(backend)?;
        sqlx::query(
            r#"
            INSERT INTO entries (id, text, embedding, dims, model, source_file, chunk_index,
                                 content_hash, created_at, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                embedding = excluded.embedding,
                dims = excluded.dims,
                model = excluded.model,
                source_file = excluded.source_file,
                chunk_index = excluded.chunk_index,
                content_hash = excluded.content_hash,
                created_at = excluded.created_at,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(&e.id)
        .bind(&e.text)
        .bind(vec_to_blob(&e.vector))
        .bind(e.vector.len() as i64)
        .bind(&e.metadata.model)
        .bind(&e.metadata.source_file)
        .bind(e.metadata.chunk_index.map(|i| i as i64))
        .bind(&e.metadata.content_hash)
        .bind(e.metadata.timestamp)
        .bind(metadata_json)
        .execute(&mut **tx)
        .await
        .map_err(backend)?;
    }
    Ok(())
}

fn row_to_entry(row: &SqliteRow, collection: &str) -> Result<(u64, Entry), StoreError> {
    let seq: i64 = row.get("seq");
    let blob: Vec<u8> = row.get("embedding");
    let metadata_json: String = row.get("metadata_json");
    let extra = serde_json::from_str(&metadata_json).map_err(backend)?;
    let chunk_index: Option<i64> = row.get("chunk_index");

    let entry = Entry {
        id: row.get("id"),
        text: row.get("text"),
        vector: blob_to_vec(&blob),
        metadata: EntryMetadata {
            source_file: row.get("source_file"),
            chunk_index: chunk_index.map(|i| i as usize),
            collection: collection.to_string(),
            timestamp: row.get("created_at"),
            model: row.get("model"),
            content_hash: row.get("content_hash"),
            extra,
        },
    };
    Ok((seq as u64, entry))
}

const SELECT_ENTRY: &str = "SELECT seq, id, text, embedding, model, source_file, chunk_index, \
                            content_hash, created_at, metadata_json FROM entries";

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, collection: &str, entries: &[Entry]) -> Result<(), StoreError> {
        let handle = self.open(collection).await?;
        let _guard = handle.write_lock.lock().await;

        let mut tx = handle.pool.begin().await.map_err(backend)?;
        let existing = stored_dims(&mut tx, None).await?;
        check_dims(collection, existing, entries)?;
        insert_entries(&mut tx, entries).await?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredEntry>, StoreError> {
        let handle = self.open(collection).await?;
        let rows = sqlx::query(&format!("{SELECT_ENTRY} ORDER BY seq"))
            .fetch_all(&handle.pool)
            .await
            .map_err(backend)?;

        let stored = rows
            .iter()
            .map(|row| row_to_entry(row, collection))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some((_, first)) = stored.first() {
            if first.vector.len() != vector.len() {
                return Err(StoreError::DimensionMismatch {
                    collection: collection.to_string(),
                    id: "<query>".into(),
                    expected: first.vector.len(),
                    actual: vector.len(),
                });
            }
        }

        Ok(rank(score_entries(vector, stored), k, min_score))
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<usize, StoreError> {
        let handle = self.open(collection).await?;
        let _guard = handle.write_lock.lock().await;

        let mut tx = handle.pool.begin().await.map_err(backend)?;
        let mut removed = 0u64;
        for id in ids {
            removed += sqlx::query("DELETE FROM entries WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(backend)?
                .rows_affected();
        }
        tx.commit().await.map_err(backend)?;
        Ok(removed as usize)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Entry>, StoreError> {
        let handle = self.open(collection).await?;
        let row = sqlx::query(&format!("{SELECT_ENTRY} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&handle.pool)
            .await
            .map_err(backend)?;
        row.map(|r| row_to_entry(&r, collection).map(|(_, e)| e))
            .transpose()
    }

    async fn replace_source(
        &self,
        collection: &str,
        source_file: &str,
        entries: &[Entry],
    ) -> Result<(), StoreError> {
        let handle = self.open(collection).await?;
        let _guard = handle.write_lock.lock().await;

        let mut tx = handle.pool.begin().await.map_err(backend)?;
        let existing = stored_dims(&mut tx, Some(source_file)).await?;
        check_dims(collection, existing, entries)?;
        sqlx::query("DELETE FROM entries WHERE source_file = ?")
            .bind(source_file)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        insert_entries(&mut tx, entries).await?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn source_hash(
        &self,
        collection: &str,
        source_file: &str,
    ) -> Result<Option<String>, StoreError> {
        let handle = self.open(collection).await?;
        let row = sqlx::query(
            "SELECT content_hash FROM entries \
             WHERE source_file = ? AND content_hash IS NOT NULL \
             ORDER BY seq LIMIT 1",
        )
        .bind(source_file)
        .fetch_optional(&handle.pool)
        .await
        .map_err(backend)?;
        Ok(row.and_then(|r| r.get::<Option<String>, _>("content_hash")))
    }

    async fn models(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let handle = self.open(collection).await?;
        let rows = sqlx::query("SELECT DISTINCT model FROM entries ORDER BY model")
            .fetch_all(&handle.pool)
            .await
            .map_err(backend)?;
        Ok(rows.iter().map(|r| r.get("model")).collect())
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let handle = self.open(collection).await?;
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&handle.pool)
            .await
            .map_err(backend)?;
        Ok(n as usize)
    }
}
