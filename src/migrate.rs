use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;
use knowledge_router_core::models::{KNOWLEDGE, MEMORY};
use knowledge_router_core::store::VectorStore;

/// Create the schema for one collection database. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // seq is the insertion order; upserts by id keep it.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            model TEXT NOT NULL,
            source_file TEXT,
            chunk_index INTEGER,
            content_hash TEXT,
            created_at INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_source ON entries(source_file)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the store root and both built-in collections (`kr init`).
pub async fn init_store(config: &Config) -> Result<()> {
    std::fs::create_dir_all(&config.store.root)?;
    let store = SqliteStore::new(&config.store.root);
    for collection in [KNOWLEDGE, MEMORY] {
        let n = store.count(collection).await?;
        tracing::info!(collection, entries = n, "collection ready");
    }
    store.close().await;
    Ok(())
}
