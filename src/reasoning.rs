//! External reasoning adapter for the router.
//!
//! A [`ReasoningAdapter`] gets the goal, caller metadata, retrieved
//! context, and the known agents, and proposes an assignment. The router
//! owns the deadline and validation; any error here, including a
//! well-formed answer naming an unknown agent, sends it down the
//! deterministic rule path instead.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::config::ReasoningConfig;
use crate::embedding::post_json_with_retry;

#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("reasoning call timed out after {0:?}")]
    Timeout(Duration),
    #[error("reasoning chose unknown agent '{0}'")]
    UnknownAgent(String),
    #[error("reasoning returned confidence {0} outside [0, 1]")]
    InvalidConfidence(f64),
    #[error("malformed reasoning output: {0}")]
    Malformed(String),
}

/// An agent as presented to the adapter.
#[derive(Debug, Clone)]
pub struct AgentSummary {
    pub id: String,
    pub description: String,
}

pub struct ReasoningRequest<'a> {
    pub goal: &'a str,
    pub meta: &'a Map<String, Value>,
    /// Retrieved knowledge snippets, most relevant first.
    pub context: &'a [String],
    pub agents: &'a [AgentSummary],
}

/// Raw proposal; validated by the router before use.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReasoningOutput {
    pub agent: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

#[async_trait]
pub trait ReasoningAdapter: Send + Sync {
    fn name(&self) -> &str;
    async fn reason(&self, request: &ReasoningRequest<'_>) -> Result<ReasoningOutput>;
}

// ============ OpenAI chat completions ============

pub struct OpenAIReasoner {
    model: String,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIReasoner {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
            client,
        })
    }
}

fn system_prompt(agents: &[AgentSummary]) -> String {
    let roster = agents
        .iter()
        .map(|a| format!("- {}: {}", a.id, a.description))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You route software development goals to the most suitable agent.\n\
         Available agents:\n{roster}\n\n\
         Think through the goal's intent and the provided knowledge context, then \
         answer with a JSON object with keys: agent (one of the ids above), \
         confidence (number between 0 and 1), reasoning (one short paragraph), \
         steps (array of concrete implementation steps)."
    )
}

fn user_prompt(request: &ReasoningRequest<'_>) -> String {
    let mut prompt = format!("Goal: {}\n", request.goal);
    if !request.meta.is_empty() {
        prompt.push_str(&format!("Metadata: {}\n", Value::Object(request.meta.clone())));
    }
    if !request.context.is_empty() {
        prompt.push_str("Relevant knowledge:\n");
        for snippet in request.context {
            prompt.push_str(&format!("- {snippet}\n"));
        }
    }
    prompt
}

/// Pull the JSON object out of a chat completion response.
fn parse_chat_output(json: &Value) -> Result<ReasoningOutput> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| ReasoningError::Malformed("missing choices[0].message.content".into()))?;
    serde_json::from_str(content)
        .map_err(|e| ReasoningError::Malformed(e.to_string()).into())
}

#[async_trait]
impl ReasoningAdapter for OpenAIReasoner {
    fn name(&self) -> &str {
        &self.model
    }

    async fn reason(&self, request: &ReasoningRequest<'_>) -> Result<ReasoningOutput> {
        let body = json!({
            "model": self.model,
            "temperature": 0.1,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system_prompt(request.agents)},
                {"role": "user", "content": user_prompt(request)},
            ],
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/chat/completions", self.url.trim_end_matches('/')),
            Some(&self.api_key),
            &body,
            0,
            "OpenAI API",
        )
        .await?;
        parse_chat_output(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_output() {
        let json = json!({
            "choices": [{"message": {"content":
                "{\"agent\":\"db\",\"confidence\":0.9,\"reasoning\":\"schema work\",\"steps\":[\"a\"]}"
            }}]
        });
        let out = parse_chat_output(&json).unwrap();
        assert_eq!(out.agent, "db");
        assert_eq!(out.steps, vec!["a".to_string()]);
    }

    #[test]
    fn test_parse_chat_output_rejects_prose() {
        let json = json!({"choices": [{"message": {"content": "I think db"}}]});
        let err = parse_chat_output(&json).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReasoningError>(),
            Some(ReasoningError::Malformed(_))
        ));
        assert!(parse_chat_output(&json!({})).is_err());
    }

    #[test]
    fn test_prompts_mention_agents_and_context() {
        let agents = vec![AgentSummary {
            id: "tests".into(),
            description: "Testing".into(),
        }];
        assert!(system_prompt(&agents).contains("- tests: Testing"));
        let meta = Map::new();
        let context = vec!["use pytest fixtures".to_string()];
        let request = ReasoningRequest {
            goal: "add tests",
            meta: &meta,
            context: &context,
            agents: &agents,
        };
        let prompt = user_prompt(&request);
        assert!(prompt.contains("Goal: add tests"));
        assert!(prompt.contains("- use pytest fixtures"));
        assert!(!prompt.contains("Metadata"));
    }
}
