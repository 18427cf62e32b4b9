//! # knowledge-router core
//!
//! Runtime-independent logic for knowledge-router: data models, the
//! token-window chunker, the vector store abstraction, result ranking,
//! the embedding traits, and capability scoring for the router.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Durable
//! storage, HTTP embedding backends, and the service layer live in the
//! `knowledge-router` app crate.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod routing;
pub mod search;
pub mod store;
