//! Service wiring.
//!
//! [`Services`] builds every component once from a [`Config`] and hands
//! the same store, embedder, and event log to each of them. The CLI and
//! the JSON-RPC server both work against a `Services` value.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use knowledge_router_core::embedding::Embedder;
use knowledge_router_core::store::VectorStore;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::events::EventLog;
use crate::ingest::IngestPipeline;
use crate::memory::MemoryStore;
use crate::reasoning::{OpenAIReasoner, ReasoningAdapter};
use crate::retrieval::RetrievalService;
use crate::router::CapabilityRouter;
use crate::sqlite_store::SqliteStore;

pub struct Services {
    pub config: Arc<Config>,
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub events: Arc<EventLog>,
    pub retrieval: Arc<RetrievalService>,
    pub memory: MemoryStore,
    pub router: CapabilityRouter,
    pub pipeline: IngestPipeline,
}

impl Services {
    /// SQLite store under `store.root`, the configured embedder, and the
    /// OpenAI reasoner when `[router.reasoning]` is enabled.
    pub fn from_config(config: Config) -> Result<Self> {
        let store: Arc<dyn VectorStore> = Arc::new(SqliteStore::new(&config.store.root));
        let embedder = create_embedder(&config.embedding)?;
        let reasoner: Option<Arc<dyn ReasoningAdapter>> = if config.router.reasoning.enabled {
            Some(Arc::new(OpenAIReasoner::new(&config.router.reasoning)?))
        } else {
            None
        };
        tracing::debug!(
            store = %config.store.root.display(),
            model = %embedder.model_id(),
            reasoning = reasoner.is_some(),
            "services configured"
        );
        Self::with_parts(config, store, embedder, reasoner)
    }

    /// Assemble from explicit parts.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        reasoner: Option<Arc<dyn ReasoningAdapter>>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let events = Arc::new(EventLog::new(&config.events.path));
        let retrieval = Arc::new(RetrievalService::new(
            store.clone(),
            embedder.clone(),
            Duration::from_secs(config.embedding.timeout_secs),
        ));
        let threshold = config.retrieval.similarity_threshold;
        let memory = MemoryStore::new(retrieval.clone(), threshold);

        let mut router = CapabilityRouter::new(&config.router, threshold)?
            .with_retrieval(retrieval.clone())
            .with_events(events.clone());
        if let Some(reasoner) = reasoner {
            let timeout = Duration::from_secs(config.router.reasoning.timeout_secs);
            router = router.with_reasoner(reasoner, timeout);
        }

        let pipeline = IngestPipeline::new(
            config.clone(),
            store.clone(),
            embedder.clone(),
            events.clone(),
        )?;

        Ok(Self {
            config,
            store,
            embedder,
            events,
            retrieval,
            memory,
            router,
            pipeline,
        })
    }
}
