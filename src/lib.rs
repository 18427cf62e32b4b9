//! # knowledge-router
//!
//! A local-first knowledge and memory retrieval engine with a capability
//! router for agent tasks.
//!
//! ```text
//! ┌──────────┐   ┌─────────────────┐   ┌────────────┐
//! │  Files   │──▶│ Ingest pipeline │──▶│  SQLite    │
//! │ md/txt/  │   │ chunk + embed   │   │ per-coll.  │
//! │ json/pdf │   └─────────────────┘   └─────┬──────┘
//! └──────────┘                               │
//!                    ┌───────────────────────┤
//!                    ▼                       ▼
//!             ┌────────────┐          ┌────────────┐
//!             │ Retrieval  │◀─────────│   Router   │
//!             │ + memory   │  context │ rules (+LLM)│
//!             └─────┬──────┘          └─────┬──────┘
//!                   └──────────┬────────────┘
//!                              ▼
//!                   ┌─────────────────────┐
//!                   │ CLI (kr) / JSON-RPC │
//!                   └─────────────────────┘
//! ```
//!
//! Pure logic (chunking, hashing embedder, ranking, profile scoring, the
//! [`VectorStore`](knowledge_router_core::store::VectorStore) trait and
//! its in-memory backend) lives in `knowledge-router-core`.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] / [`migrate`] | SQLite connections and schema |
//! | [`sqlite_store`] | Persistent vector store |
//! | [`embedding`] | Embedding providers |
//! | [`extract`] | Text extraction (text, JSON, PDF) |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retrieval`] | Query embedding and ranked search |
//! | [`memory`] | Memories and preferences |
//! | [`reasoning`] / [`router`] | Capability routing |
//! | [`events`] | Append-only JSONL event log |
//! | [`services`] | Component wiring |
//! | [`tools`] / [`server`] | Tool dispatch and the stdio JSON-RPC server |

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod events;
pub mod extract;
pub mod ingest;
pub mod memory;
pub mod migrate;
pub mod reasoning;
pub mod retrieval;
pub mod router;
pub mod server;
pub mod services;
pub mod sqlite_store;
pub mod tools;
