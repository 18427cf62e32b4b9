//! # knowledge-router CLI (`kr`)
//!
//! ```bash
//! kr --config ./config/kr.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kr init` | Create the store directories and schema |
//! | `kr ingest <paths..>` | Ingest files and directories into `knowledge` |
//! | `kr search "<query>"` | Search knowledge (or memory with `--memory`) |
//! | `kr remember "<text>"` | Add a memory |
//! | `kr pref set <key> <value>` | Store a preference |
//! | `kr pref get <key>` | Look up a preference |
//! | `kr route "<goal>"` | Assign a goal to an agent |
//! | `kr events` | Show recent event log entries |
//! | `kr serve` | Serve JSON-RPC tools on stdio |
//!
//! Logs go to stderr; `RUST_LOG` overrides `--log-level`.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use knowledge_router::config;
use knowledge_router::ingest::{summarize, FileStatus};
use knowledge_router::migrate;
use knowledge_router::server;
use knowledge_router::services::Services;
use knowledge_router_core::models::KNOWLEDGE;

/// Knowledge and memory retrieval with a capability router for agent tasks.
#[derive(Parser)]
#[command(name = "kr", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kr.toml")]
    config: PathBuf,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store directories and schema. Safe to re-run.
    Init,

    /// Ingest files and directories into the knowledge collection.
    ///
    /// Unchanged files are skipped, so repeated runs are cheap.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Similarity search over knowledge, or memory with `--memory`.
    Search {
        query: String,

        /// Search the memory collection instead of knowledge.
        #[arg(long)]
        memory: bool,

        /// Number of results (defaults to the configured k).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Store a free-text memory.
    Remember {
        text: String,

        /// Context category.
        #[arg(long, default_value = "general")]
        context: String,
    },

    /// Store or look up a preference.
    Pref {
        #[command(subcommand)]
        action: PrefAction,
    },

    /// Route a goal to the best-suited agent and print the decision as JSON.
    Route {
        goal: String,

        /// Metadata passed to the reasoning adapter, as `key=value`.
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },

    /// Show the most recent event log entries, newest first.
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Serve JSON-RPC tools over stdin/stdout.
    Serve,
}

#[derive(Subcommand)]
enum PrefAction {
    Set { key: String, value: String },
    Get { key: String },
}

/// Parse a `key=value` pair for `--meta` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::init_store(&cfg).await?;
            println!("Store initialized at {}", cfg.store.root.display());
        }
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
        command => {
            let services = Services::from_config(cfg)?;
            run_command(&services, command).await?;
        }
    }

    Ok(())
}

async fn run_command(services: &Services, command: Commands) -> Result<()> {
    let retrieval_cfg = &services.config.retrieval;

    match command {
        Commands::Ingest { paths } => {
            let results = services.pipeline.ingest(&paths).await?;
            for r in &results {
                let status = match r.status {
                    FileStatus::Success => "ok",
                    FileStatus::Skipped => "skip",
                    FileStatus::Error => "error",
                };
                match &r.detail {
                    Some(detail) => println!("{:<5} {} ({})", status, r.path, detail),
                    None => println!("{:<5} {} ({} chunks)", status, r.path, r.chunk_count),
                }
            }
            let (ok, skipped, errors) = summarize(&results);
            println!("Ingestion complete: {ok} successful, {errors} errors, {skipped} skipped");
        }
        Commands::Search { query, memory, k } => {
            let hits = if memory {
                services
                    .memory
                    .search(&query, k.unwrap_or(retrieval_cfg.memory_k))
                    .await?
            } else {
                services
                    .retrieval
                    .search(
                        KNOWLEDGE,
                        &query,
                        k.unwrap_or(retrieval_cfg.default_k),
                        retrieval_cfg.similarity_threshold,
                    )
                    .await?
            };
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                let source = hit.metadata.source_file.as_deref().unwrap_or(&hit.id);
                let location = match hit.metadata.chunk_index {
                    Some(idx) => format!("{source}#{idx}"),
                    None => source.to_string(),
                };
                let snippet: String = hit.text.chars().take(160).collect();
                println!("{}. [{:.3}] {}", i + 1, hit.score, location);
                println!("   {}", snippet.replace('\n', " "));
            }
        }
        Commands::Remember { text, context } => {
            let mut metadata = Map::new();
            metadata.insert("context".into(), Value::String(context));
            let id = services.memory.add(&text, metadata).await?;
            println!("{id}");
        }
        Commands::Pref { action } => match action {
            PrefAction::Set { key, value } => {
                let entry = services.memory.store_preference(&key, &value).await?;
                print_json(&entry)?;
            }
            PrefAction::Get { key } => match services.memory.retrieve_preference(&key).await? {
                Some(entry) => print_json(&entry)?,
                None => {
                    println!("null");
                    eprintln!("No preference found for '{key}'");
                }
            },
        },
        Commands::Route { goal, meta } => {
            let meta: Map<String, Value> = meta
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            let result = services.router.route(&goal, &meta).await;
            print_json(&result)?;
        }
        Commands::Events { limit } => {
            let events = services.events.recent(limit).await?;
            if events.is_empty() {
                println!("No events.");
            }
            for e in events {
                if e.hint.is_empty() {
                    println!("{} {}: {}", e.timestamp, e.event, e.detail);
                } else {
                    println!("{} {}: {} (hint: {})", e.timestamp, e.event, e.detail, e.hint);
                }
            }
        }
        Commands::Init | Commands::Serve => {}
    }
    Ok(())
}
