//! Typed failures raised by the service layer.
//!
//! Services return `anyhow::Result`; these types ride inside the
//! `anyhow::Error` so the JSON-RPC layer can downcast and pick an error
//! code, the same way it recognizes [`StoreError`](knowledge_router_core::store::StoreError).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The collection holds vectors from a different embedding model than
    /// the one configured. Querying or writing would mix incomparable
    /// vectors, so the call is refused until the collection is rebuilt.
    #[error(
        "collection '{collection}' was embedded with {stored} but the configured model is {configured}; re-ingest or restore the embedding config"
    )]
    ModelMismatch {
        collection: String,
        stored: String,
        configured: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
