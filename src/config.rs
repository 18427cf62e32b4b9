//! TOML configuration.
//!
//! Loaded once at startup by [`load_config`] and immutable afterwards.
//! Every section except `[store]` may be omitted; omitted keys take the
//! defaults below. Validation runs after parsing so a bad file fails
//! before any store is opened.

use anyhow::{bail, Context, Result};
use knowledge_router_core::chunk::ChunkingParams;
use knowledge_router_core::routing::{
    default_profiles, ProfileSet, ProfileSpec, ScoringWeights,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub chunking: ChunkingParams,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Directory holding one subdirectory per collection.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventsConfig {
    #[serde(default = "default_events_path")]
    pub path: PathBuf,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            path: default_events_path(),
        }
    }
}

fn default_events_path() -> PathBuf {
    PathBuf::from("./data/events.jsonl")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_retry_backoff_ms() -> u64 {
    500
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    /// Accepted extensions, with or without the leading dot.
    #[serde(default = "default_file_types")]
    pub file_types: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_true")]
    pub skip_hidden: bool,
    /// Globs excluded during directory expansion.
    #[serde(default = "default_skip_patterns")]
    pub skip_patterns: Vec<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            file_types: default_file_types(),
            max_file_bytes: default_max_file_bytes(),
            skip_hidden: true,
            skip_patterns: default_skip_patterns(),
        }
    }
}

fn default_file_types() -> Vec<String> {
    [".md", ".txt", ".json", ".pdf"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_skip_patterns() -> Vec<String> {
    ["**/.git/**", "**/node_modules/**", "**/target/**", "**/__pycache__/**"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl IngestionConfig {
    /// Whether `path` has one of the configured extensions.
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_lowercase();
        self.file_types
            .iter()
            .any(|t| t.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_memory_k")]
    pub memory_k: usize,
    /// Minimum cosine similarity for memory recall, semantic preference
    /// lookup, and router context hints.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            memory_k: default_memory_k(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_memory_k() -> usize {
    3
}
fn default_similarity_threshold() -> f32 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct RouterConfig {
    #[serde(default = "default_weight")]
    pub keyword_weight: f32,
    #[serde(default = "default_weight")]
    pub pattern_weight: f32,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_agent")]
    pub default_agent: String,
    /// Maximum retrieval hints appended to the step list.
    #[serde(default = "default_context_hits")]
    pub context_hits: usize,
    #[serde(default = "default_profiles")]
    pub profiles: Vec<ProfileSpec>,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            keyword_weight: default_weight(),
            pattern_weight: default_weight(),
            min_confidence: default_min_confidence(),
            default_agent: default_agent(),
            context_hits: default_context_hits(),
            profiles: default_profiles(),
            reasoning: ReasoningConfig::default(),
        }
    }
}

fn default_weight() -> f32 {
    0.5
}
fn default_min_confidence() -> f32 {
    0.3
}
fn default_agent() -> String {
    "general".to_string()
}
fn default_context_hits() -> usize {
    3
}

impl RouterConfig {
    pub fn weights(&self) -> ScoringWeights {
        ScoringWeights {
            keyword: self.keyword_weight,
            pattern: self.pattern_weight,
        }
    }
}

/// Optional external reasoning step for the router.
#[derive(Debug, Deserialize, Clone)]
pub struct ReasoningConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_reasoning_provider")]
    pub provider: String,
    #[serde(default = "default_reasoning_model")]
    pub model: String,
    #[serde(default = "default_reasoning_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_reasoning_provider(),
            model: default_reasoning_model(),
            timeout_secs: default_reasoning_timeout_secs(),
            url: None,
        }
    }
}

fn default_reasoning_provider() -> String {
    "openai".to_string()
}
fn default_reasoning_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_reasoning_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

fn default_rate_limit() -> usize {
    120
}

/// Build a config rooted at `data_dir` with every other value defaulted.
pub fn default_config(data_dir: &Path) -> Config {
    Config {
        store: StoreConfig {
            root: data_dir.join("store"),
        },
        events: EventsConfig {
            path: data_dir.join("events.jsonl"),
        },
        chunking: ChunkingParams::default(),
        embedding: EmbeddingConfig::default(),
        ingestion: IngestionConfig::default(),
        retrieval: RetrievalConfig::default(),
        router: RouterConfig::default(),
        server: ServerConfig::default(),
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    config
        .chunking
        .validate()
        .context("Invalid [chunking] section")?;

    if config.retrieval.default_k == 0 || config.retrieval.memory_k == 0 {
        bail!("retrieval.default_k and retrieval.memory_k must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        bail!("retrieval.similarity_threshold must be in [-1.0, 1.0]");
    }

    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "hash" | "disabled" => {}
        "openai" | "ollama" | "local" => {
            if embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, ollama, local, or disabled.",
            other
        ),
    }
    if embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if matches!(embedding.provider.as_str(), "openai" | "ollama") && embedding.dims.is_none() {
        bail!(
            "embedding.dims must be specified when provider is '{}'",
            embedding.provider
        );
    }
    if embedding.batch_size == 0 {
        bail!("embedding.batch_size must be >= 1");
    }

    if config.ingestion.file_types.is_empty() {
        bail!("ingestion.file_types must not be empty");
    }

    let router = &config.router;
    router
        .weights()
        .validate()
        .context("Invalid [router] weights")?;
    if !(0.0..=1.0).contains(&router.min_confidence) {
        bail!("router.min_confidence must be in [0.0, 1.0]");
    }
    let profiles = ProfileSet::compile(&router.profiles).context("Invalid [[router.profiles]]")?;
    if profiles.get(&router.default_agent).is_none() {
        bail!(
            "router.default_agent '{}' is not one of the configured profiles: {}",
            router.default_agent,
            profiles.ids().join(", ")
        );
    }
    if router.reasoning.enabled && router.reasoning.provider != "openai" {
        bail!(
            "Unknown reasoning provider: '{}'. Must be openai.",
            router.reasoning.provider
        );
    }

    if config.server.rate_limit_per_minute == 0 {
        bail!("server.rate_limit_per_minute must be >= 1");
    }

    Ok(())
}
