//! Tool registry and dispatch.
//!
//! The tool set is closed: every tool is a [`ToolName`] variant and
//! [`call_tool`] matches on it exhaustively. Arguments are decoded into
//! typed structs; a decode failure becomes
//! [`ServiceError::InvalidInput`] so the server can answer with an
//! invalid-params error instead of a generic tool failure.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use knowledge_router_core::models::KNOWLEDGE;

use crate::error::ServiceError;
use crate::ingest::{summarize, FileStatus};
use crate::services::Services;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    RagIngest,
    SearchKnowledge,
    RagSearch,
    AddKnowledge,
    SearchMemory,
    AddMemory,
    Preference,
    Route,
    LogEvent,
}

impl ToolName {
    pub const ALL: [ToolName; 9] = [
        ToolName::AddKnowledge,
        ToolName::SearchKnowledge,
        ToolName::AddMemory,
        ToolName::SearchMemory,
        ToolName::RagSearch,
        ToolName::RagIngest,
        ToolName::Preference,
        ToolName::Route,
        ToolName::LogEvent,
    ];

    /// Wire name used in `tools/call`.
    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::RagIngest => "rag.ingest",
            ToolName::SearchKnowledge => "search_knowledge",
            ToolName::RagSearch => "rag.search",
            ToolName::AddKnowledge => "add_knowledge",
            ToolName::SearchMemory => "search_memory",
            ToolName::AddMemory => "add_memory",
            ToolName::Preference => "preference",
            ToolName::Route => "orchestrator.route",
            ToolName::LogEvent => "memory.log",
        }
    }

    pub fn parse(name: &str) -> Option<ToolName> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            ToolName::RagIngest => "Ingest files and directories into the knowledge base",
            ToolName::SearchKnowledge => "Search the knowledge base for relevant information",
            ToolName::RagSearch => "Search the knowledge base for relevant content chunks",
            ToolName::AddKnowledge => "Add content to the knowledge base for future retrieval",
            ToolName::SearchMemory => "Search conversation memory for relevant context",
            ToolName::AddMemory => "Add content to conversation memory",
            ToolName::Preference => "Store or look up a user preference",
            ToolName::Route => "Route a goal to the most appropriate specialized agent",
            ToolName::LogEvent => "Log an error or lesson learned to the event log",
        }
    }

    pub fn parameters_schema(self) -> Value {
        match self {
            ToolName::RagIngest => json!({
                "type": "object",
                "properties": {
                    "paths": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "File or directory paths to ingest (default: knowledge/)"
                    }
                }
            }),
            ToolName::SearchKnowledge | ToolName::SearchMemory => json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The search query" },
                    "n_results": { "type": "integer", "description": "Number of results to return" }
                },
                "required": ["query"]
            }),
            ToolName::RagSearch => json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The search query" },
                    "k": { "type": "integer", "description": "Number of chunks to return" }
                },
                "required": ["query"]
            }),
            ToolName::AddKnowledge => json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string", "description": "The content to add" },
                    "metadata": { "type": "object", "additionalProperties": true }
                },
                "required": ["content"]
            }),
            ToolName::AddMemory => json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string", "description": "The content to remember" },
                    "context": { "type": "string", "description": "Context category", "default": "general" },
                    "metadata": { "type": "object", "additionalProperties": true }
                },
                "required": ["content"]
            }),
            ToolName::Preference => json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["set", "get"] },
                    "key": { "type": "string" },
                    "value": { "type": "string", "description": "Required for set" }
                },
                "required": ["action", "key"]
            }),
            ToolName::Route => json!({
                "type": "object",
                "properties": {
                    "goal": { "type": "string", "description": "The goal or task to route" },
                    "meta": { "type": "object", "additionalProperties": true }
                },
                "required": ["goal"]
            }),
            ToolName::LogEvent => json!({
                "type": "object",
                "properties": {
                    "event": { "type": "string", "description": "Brief description of the event" },
                    "detail": { "type": "string", "description": "What happened" },
                    "hint": { "type": "string", "description": "Optional lesson learned" }
                },
                "required": ["event", "detail"]
            }),
        }
    }
}

/// Tool metadata as listed by `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

pub struct ToolRegistry {
    tools: Vec<ToolInfo>,
}

impl ToolRegistry {
    /// Build the registry, checking that wire names are unique and every
    /// schema is a JSON object schema.
    pub fn new() -> Result<Self> {
        let mut seen = HashSet::new();
        let mut tools = Vec::with_capacity(ToolName::ALL.len());
        for tool in ToolName::ALL {
            if !seen.insert(tool.as_str()) {
                bail!("duplicate tool name: {}", tool.as_str());
            }
            let schema = tool.parameters_schema();
            if schema.get("type").and_then(Value::as_str) != Some("object") {
                bail!("tool {} must take an object schema", tool.as_str());
            }
            tools.push(ToolInfo {
                name: tool.as_str(),
                description: tool.description(),
                input_schema: schema,
            });
        }
        Ok(Self { tools })
    }

    pub fn list(&self) -> &[ToolInfo] {
        &self.tools
    }

    pub fn resolve(&self, name: &str) -> Option<ToolName> {
        ToolName::parse(name)
    }
}

// ============ Arguments ============

#[derive(Debug, Deserialize)]
struct IngestArgs {
    #[serde(default = "default_ingest_paths")]
    paths: Vec<String>,
}

fn default_ingest_paths() -> Vec<String> {
    vec!["knowledge/".to_string()]
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default, alias = "k")]
    n_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct AddArgs {
    #[serde(alias = "text")]
    content: String,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    context: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PreferenceAction {
    Set,
    Get,
}

#[derive(Debug, Deserialize)]
struct PreferenceArgs {
    action: PreferenceAction,
    key: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RouteArgs {
    goal: String,
    #[serde(default)]
    meta: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct LogArgs {
    event: String,
    detail: String,
    #[serde(default)]
    hint: Option<String>,
}

fn parse_args<T: DeserializeOwned>(tool: ToolName, args: Value) -> Result<T> {
    let args = if args.is_null() {
        Value::Object(Map::new())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| {
        ServiceError::InvalidInput(format!("{}: {}", tool.as_str(), e)).into()
    })
}

/// Run `tool` with JSON `args` against `services`.
pub async fn call_tool(services: &Services, tool: ToolName, args: Value) -> Result<Value> {
    let retrieval_cfg = &services.config.retrieval;
    tracing::debug!(tool = tool.as_str(), "tool call");

    match tool {
        ToolName::RagIngest => {
            let args: IngestArgs = parse_args(tool, args)?;
            let paths: Vec<PathBuf> = args.paths.iter().map(PathBuf::from).collect();
            let results = services.pipeline.ingest(&paths).await?;
            let (_, _, errors) = summarize(&results);
            let count: usize = results
                .iter()
                .filter(|r| r.status == FileStatus::Success)
                .map(|r| r.chunk_count)
                .sum();
            Ok(json!({ "results": results, "ok": errors == 0, "count": count }))
        }
        ToolName::SearchKnowledge => {
            let args: SearchArgs = parse_args(tool, args)?;
            let k = args.n_results.unwrap_or(retrieval_cfg.default_k);
            let results = services
                .retrieval
                .search(KNOWLEDGE, &args.query, k, retrieval_cfg.similarity_threshold)
                .await?;
            Ok(json!({ "results": results }))
        }
        ToolName::RagSearch => {
            let args: SearchArgs = parse_args(tool, args)?;
            let k = args.n_results.unwrap_or(retrieval_cfg.default_k);
            let chunks = services.retrieval.chunks(&args.query, k).await?;
            Ok(json!({ "chunks": chunks }))
        }
        ToolName::AddKnowledge => {
            let args: AddArgs = parse_args(tool, args)?;
            let id = services
                .retrieval
                .add(KNOWLEDGE, &args.content, args.metadata)
                .await?;
            Ok(json!({ "document_id": id, "status": "added" }))
        }
        ToolName::SearchMemory => {
            let args: SearchArgs = parse_args(tool, args)?;
            let k = args.n_results.unwrap_or(retrieval_cfg.memory_k);
            let results = services.memory.search(&args.query, k).await?;
            Ok(json!({ "results": results }))
        }
        ToolName::AddMemory => {
            let args: AddArgs = parse_args(tool, args)?;
            let mut metadata = args.metadata;
            metadata.insert(
                "context".into(),
                args.context.unwrap_or_else(|| "general".to_string()).into(),
            );
            let id = services.memory.add(&args.content, metadata).await?;
            Ok(json!({ "memory_id": id, "status": "added" }))
        }
        ToolName::Preference => {
            let args: PreferenceArgs = parse_args(tool, args)?;
            match args.action {
                PreferenceAction::Set => {
                    let value = args.value.ok_or_else(|| {
                        ServiceError::InvalidInput("preference: 'value' is required for set".into())
                    })?;
                    let entry = services.memory.store_preference(&args.key, &value).await?;
                    Ok(serde_json::to_value(entry)?)
                }
                PreferenceAction::Get => {
                    let entry = services.memory.retrieve_preference(&args.key).await?;
                    Ok(serde_json::to_value(entry)?)
                }
            }
        }
        ToolName::Route => {
            let args: RouteArgs = parse_args(tool, args)?;
            let meta = args.meta.unwrap_or_default();
            let result = services.router.route(&args.goal, &meta).await;
            Ok(serde_json::to_value(result)?)
        }
        ToolName::LogEvent => {
            let args: LogArgs = parse_args(tool, args)?;
            services
                .events
                .append(&args.event, &args.detail, args.hint.as_deref())
                .await?;
            Ok(json!({ "ok": true }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lists_every_tool_once() {
        let registry = ToolRegistry::new().unwrap();
        assert_eq!(registry.list().len(), ToolName::ALL.len());
        for tool in ToolName::ALL {
            assert_eq!(registry.resolve(tool.as_str()), Some(tool));
        }
        assert_eq!(registry.resolve("rm_rf"), None);
    }

    #[test]
    fn test_bad_arguments_are_invalid_input() {
        let err = parse_args::<SearchArgs>(ToolName::SearchKnowledge, json!({"k": 3})).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ServiceError>(),
            Some(ServiceError::InvalidInput(_))
        ));
        let err = parse_args::<PreferenceArgs>(
            ToolName::Preference,
            json!({"action": "drop", "key": "x"}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("preference"));
    }

    #[test]
    fn test_null_arguments_use_defaults() {
        let args: IngestArgs = parse_args(ToolName::RagIngest, Value::Null).unwrap();
        assert_eq!(args.paths, vec!["knowledge/".to_string()]);
    }
}
