//! Line-delimited JSON-RPC 2.0 server over stdio.
//!
//! Each line on stdin is one request; each response is written as one
//! line on stdout. Logs go to stderr so they never interleave with
//! protocol output. Requests are handled one at a time.
//!
//! Methods: `initialize`, `tools/list`, `tools/call`. Notifications
//! (`notifications/*` without an id) get no response.
//!
//! Error codes:
//!
//! | Code | Meaning |
//! |------|---------|
//! | `-32700` | line is not valid JSON |
//! | `-32601` | unknown method or tool |
//! | `-32602` | invalid params, bad tool arguments, bad collection name |
//! | `-32000` | tool failed (store error, model mismatch, embedder down) |
//! | `-32001` | rate limit exceeded |

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use knowledge_router_core::store::StoreError;

use crate::config::Config;
use crate::error::ServiceError;
use crate::services::Services;
use crate::tools::{call_tool, ToolRegistry};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const TOOL_ERROR: i64 = -32000;
pub const RATE_LIMITED: i64 = -32001;

/// Sliding one-minute window of accepted requests.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    accepted: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn per_minute(limit: usize) -> Self {
        Self {
            limit,
            window: Duration::from_secs(60),
            accepted: VecDeque::new(),
        }
    }

    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    pub fn allow_at(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.accepted.front() {
            if now.duration_since(oldest) >= self.window {
                self.accepted.pop_front();
            } else {
                break;
            }
        }
        if self.accepted.len() >= self.limit {
            return false;
        }
        self.accepted.push_back(now);
        true
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn failure(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() }
    })
}

/// Pick a JSON-RPC error code for a failed tool call.
fn classify_tool_error(tool: &str, err: &anyhow::Error) -> (i64, String) {
    let code = if let Some(e) = err.downcast_ref::<ServiceError>() {
        match e {
            ServiceError::InvalidInput(_) => INVALID_PARAMS,
            ServiceError::ModelMismatch { .. } => TOOL_ERROR,
        }
    } else if let Some(StoreError::InvalidCollection(_)) = err.downcast_ref::<StoreError>() {
        INVALID_PARAMS
    } else {
        TOOL_ERROR
    };
    (code, format!("{tool}: {err:#}"))
}

pub struct McpServer {
    services: Services,
    tools: ToolRegistry,
    limiter: Mutex<RateLimiter>,
}

impl McpServer {
    pub fn new(services: Services) -> Result<Self> {
        let limit = services.config.server.rate_limit_per_minute;
        Ok(Self {
            services,
            tools: ToolRegistry::new()?,
            limiter: Mutex::new(RateLimiter::per_minute(limit)),
        })
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Handle one raw input line. `None` means nothing is written back.
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request");
                Some(failure(Value::Null, PARSE_ERROR, "Parse error"))
            }
        }
    }

    pub async fn handle_message(&self, message: Value) -> Option<Value> {
        let id = message.get("id").cloned();
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if id.is_none() && method.starts_with("notifications/") {
            tracing::debug!(method = %method, "notification");
            return None;
        }
        let id = id.unwrap_or(Value::Null);

        if !self.limiter.lock().await.allow() {
            tracing::warn!(method = %method, "rate limit exceeded");
            return Some(failure(
                id,
                RATE_LIMITED,
                "Rate limit exceeded. Please wait before making more requests.",
            ));
        }

        let response = match method.as_str() {
            "initialize" => success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            ),
            "tools/list" => success(id, json!({ "tools": self.tools.list() })),
            "tools/call" => {
                let params = message.get("params").cloned().unwrap_or(Value::Null);
                self.call(id, params).await
            }
            other => failure(id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
        };
        Some(response)
    }

    async fn call(&self, id: Value, params: Value) -> Value {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return failure(id, INVALID_PARAMS, "tools/call requires a string 'name'");
        };
        let Some(tool) = self.tools.resolve(name) else {
            return failure(id, METHOD_NOT_FOUND, format!("Unknown tool: {name}"));
        };
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);

        let started = Instant::now();
        match call_tool(&self.services, tool, args).await {
            Ok(result) => {
                tracing::info!(tool = name, elapsed_ms = started.elapsed().as_millis() as u64, "tool ok");
                success(id, result)
            }
            Err(e) => {
                let (code, message) = classify_tool_error(name, &e);
                tracing::warn!(tool = name, code, error = %message, "tool failed");
                failure(id, code, message)
            }
        }
    }
}

/// Serve JSON-RPC on stdin/stdout until stdin closes.
pub async fn run_server(config: Config) -> Result<()> {
    let server = McpServer::new(Services::from_config(config)?)?;
    tracing::info!(
        store = %server.services().config.store.root.display(),
        "serving JSON-RPC on stdio"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if let Some(response) = server.handle_line(&line).await {
            let mut out = serde_json::to_string(&response)?;
            out.push('\n');
            stdout.write_all(out.as_bytes()).await?;
            stdout.flush().await?;
        }
    }
    tracing::info!("stdin closed, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use knowledge_router_core::embedding::HashEmbedder;
    use knowledge_router_core::store::memory::InMemoryStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn server(dir: &TempDir, rate_limit: usize) -> McpServer {
        let mut config = default_config(dir.path());
        config.server.rate_limit_per_minute = rate_limit;
        let services = Services::with_parts(
            config,
            Arc::new(InMemoryStore::new()),
            Arc::new(HashEmbedder::new(384).unwrap()),
            None,
        )
        .unwrap();
        McpServer::new(services).unwrap()
    }

    async fn call(server: &McpServer, name: &str, arguments: Value) -> Value {
        server
            .handle_message(json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                "params": { "name": name, "arguments": arguments }
            }))
            .await
            .unwrap()
    }

    #[test]
    fn test_rate_limiter_window_slides() {
        let mut limiter = RateLimiter::per_minute(2);
        let t0 = Instant::now();
        assert!(limiter.allow_at(t0));
        assert!(limiter.allow_at(t0 + Duration::from_secs(1)));
        assert!(!limiter.allow_at(t0 + Duration::from_secs(2)));
        assert!(limiter.allow_at(t0 + Duration::from_secs(61)));
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir, 100);
        let init = server
            .handle_message(json!({"jsonrpc": "2.0", "id": 7, "method": "initialize"}))
            .await
            .unwrap();
        assert_eq!(init["id"], 7);
        assert_eq!(init["result"]["protocolVersion"], PROTOCOL_VERSION);

        let list = server
            .handle_message(json!({"jsonrpc": "2.0", "id": 8, "method": "tools/list"}))
            .await
            .unwrap();
        let names: Vec<&str> = list["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"orchestrator.route"));
        assert!(names.contains(&"memory.log"));
    }

    #[tokio::test]
    async fn test_error_codes() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir, 100);

        let parse = server.handle_line("{not json").await.unwrap();
        assert_eq!(parse["error"]["code"], PARSE_ERROR);

        let method = server
            .handle_message(json!({"jsonrpc": "2.0", "id": 1, "method": "resources/list"}))
            .await
            .unwrap();
        assert_eq!(method["error"]["code"], METHOD_NOT_FOUND);

        let tool = call(&server, "no.such.tool", json!({})).await;
        assert_eq!(tool["error"]["code"], METHOD_NOT_FOUND);

        let params = call(&server, "search_knowledge", json!({"n_results": 2})).await;
        assert_eq!(params["error"]["code"], INVALID_PARAMS);

        let blank = call(&server, "add_memory", json!({"content": "   "})).await;
        assert_eq!(blank["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_rate_limit_and_notifications() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir, 1);
        assert!(server
            .handle_message(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await
            .is_none());
        let first = server
            .handle_message(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
            .await
            .unwrap();
        assert!(first.get("result").is_some());
        let second = server
            .handle_message(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .await
            .unwrap();
        assert_eq!(second["error"]["code"], RATE_LIMITED);
    }

    #[tokio::test]
    async fn test_tool_calls_end_to_end() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir, 100);

        let added = call(
            &server,
            "add_memory",
            json!({"content": "Remember to validate webhook signatures"}),
        )
        .await;
        assert_eq!(added["result"]["status"], "added");

        let found = call(&server, "search_memory", json!({"query": "webhook signature validation"})).await;
        let results = found["result"]["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["metadata"]["context"], "general");

        let set = call(&server, "preference", json!({"action": "set", "key": "indent_style", "value": "spaces"})).await;
        assert_eq!(set["result"]["value"], "spaces");
        let get = call(&server, "preference", json!({"action": "get", "key": "indent_style"})).await;
        assert_eq!(get["result"]["lookup"], "exact");

        let routed = call(
            &server,
            "orchestrator.route",
            json!({"goal": "Write unit tests for the login module"}),
        )
        .await;
        assert_eq!(routed["result"]["agent"], "tests");
        assert_eq!(routed["result"]["strategy"], "rules");

        let logged = call(&server, "memory.log", json!({"event": "lesson", "detail": "pin versions"})).await;
        assert_eq!(logged["result"], json!({"ok": true}));
        let events = server.services().events.recent(5).await.unwrap();
        assert_eq!(events[0].event, "lesson");
    }
}
