//! Capability router.
//!
//! Assigns a free-text goal to one of the configured agents. The rule
//! path scores every [`CapabilityProfile`](knowledge_router_core::routing::CapabilityProfile)
//! and applies a confidence floor: a winner below `min_confidence` is
//! replaced by the default agent, with the true (low) confidence kept so
//! callers can tell a weak match from a strong one.
//!
//! When a [`ReasoningAdapter`] is attached, it is tried first under a
//! deadline. Timeouts, transport errors, malformed output, unknown agents,
//! and out-of-range confidences all fall back to the rule path and are
//! recorded in the event log. [`CapabilityRouter::route`] never fails.
//!
//! Retrieved knowledge above the similarity threshold is passed to the
//! adapter and appended to the rule path's steps as hints. Retrieval
//! problems are logged and ignored.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{Map, Value};

use knowledge_router_core::models::KNOWLEDGE;
use knowledge_router_core::routing::{
    ProfileSet, RoutingResult, RoutingStrategy, ScoringWeights,
};

use crate::config::RouterConfig;
use crate::events::EventLog;
use crate::reasoning::{AgentSummary, ReasoningAdapter, ReasoningError, ReasoningRequest};
use crate::retrieval::{RetrievalService, SearchHit};

const GENERIC_STEPS: &[&str] = &[
    "Analyze task requirements",
    "Implement solution",
    "Test functionality",
];
const SNIPPET_CHARS: usize = 120;

pub struct CapabilityRouter {
    profiles: ProfileSet,
    weights: ScoringWeights,
    min_confidence: f32,
    default_agent: String,
    context_hits: usize,
    similarity_threshold: f32,
    retrieval: Option<Arc<RetrievalService>>,
    reasoner: Option<Arc<dyn ReasoningAdapter>>,
    reasoning_timeout: Duration,
    events: Option<Arc<EventLog>>,
}

fn sanitize(confidence: f32) -> f32 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn snippet(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SNIPPET_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(SNIPPET_CHARS).collect();
        format!("{cut}...")
    }
}

fn hint(hit: &SearchHit) -> String {
    let source = hit
        .metadata
        .source_file
        .as_deref()
        .unwrap_or(hit.id.as_str());
    format!("Consult {}: {}", source, snippet(&hit.text))
}

impl CapabilityRouter {
    pub fn new(config: &RouterConfig, similarity_threshold: f32) -> Result<Self> {
        let weights = config.weights();
        weights.validate()?;
        let profiles = ProfileSet::compile(&config.profiles)?;
        let default_agent = profiles
            .get(&config.default_agent)
            .map(|p| p.id.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("default agent '{}' is not a profile", config.default_agent)
            })?;

        Ok(Self {
            profiles,
            weights,
            min_confidence: config.min_confidence,
            default_agent,
            context_hits: config.context_hits,
            similarity_threshold,
            retrieval: None,
            reasoner: None,
            reasoning_timeout: Duration::from_secs(config.reasoning.timeout_secs),
            events: None,
        })
    }

    pub fn with_retrieval(mut self, retrieval: Arc<RetrievalService>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    pub fn with_reasoner(mut self, reasoner: Arc<dyn ReasoningAdapter>, timeout: Duration) -> Self {
        self.reasoner = Some(reasoner);
        self.reasoning_timeout = timeout;
        self
    }

    pub fn with_events(mut self, events: Arc<EventLog>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    /// Route `goal`. Always returns a result.
    pub async fn route(&self, goal: &str, meta: &Map<String, Value>) -> RoutingResult {
        let goal = goal.trim();
        if goal.is_empty() {
            return RoutingResult {
                agent: self.default_agent.clone(),
                confidence: 0.0,
                reasoning: "Empty goal; nothing to route".to_string(),
                steps: vec!["Clarify the goal and try again".to_string()],
                strategy: RoutingStrategy::Rules,
            };
        }

        let context = self.context(goal).await;

        if let Some(reasoner) = &self.reasoner {
            match self.try_reasoning(reasoner.as_ref(), goal, meta, &context).await {
                Ok(result) => {
                    tracing::info!(agent = %result.agent, confidence = result.confidence, "routed by reasoning");
                    return result;
                }
                Err(e) => {
                    tracing::warn!(error = %e, adapter = reasoner.name(), "reasoning failed, using rules");
                    if let Some(events) = &self.events {
                        events
                            .record(
                                "routing_fallback",
                                &format!("{}: {e:#}", reasoner.name()),
                                Some("Rule-based routing was used"),
                            )
                            .await;
                    }
                }
            }
        }

        let mut result = self.route_by_rules(goal);
        result.steps.extend(context.iter().map(hint));
        tracing::info!(agent = %result.agent, confidence = result.confidence, "routed by rules");
        result
    }

    /// Deterministic scoring with the confidence floor. No retrieval hints.
    pub fn route_by_rules(&self, goal: &str) -> RoutingResult {
        let best = self.profiles.best(goal, &self.weights);

        let (profile, confidence, reasoning) = match best {
            Some((winner, score)) if score.score >= self.min_confidence => {
                let reasoning = format!(
                    "Matched '{}' (keywords {:.2}, patterns {:.2}, score {:.2})",
                    winner.id, score.keyword, score.pattern, score.score
                );
                (winner, score.score, reasoning)
            }
            other => {
                let (best_id, best_score) = other
                    .map(|(p, s)| (p.id.clone(), s.score))
                    .unwrap_or_else(|| (self.default_agent.clone(), 0.0));
                let reasoning = format!(
                    "Best match '{}' scored {:.2}, below the {:.2} floor; assigned to the default agent",
                    best_id, best_score, self.min_confidence
                );
                let fallback = self
                    .profiles
                    .get(&self.default_agent)
                    .or_else(|| self.profiles.iter().next());
                match fallback {
                    Some(p) => (p, best_score, reasoning),
                    None => {
                        return RoutingResult {
                            agent: self.default_agent.clone(),
                            confidence: sanitize(best_score),
                            reasoning,
                            steps: GENERIC_STEPS.iter().map(|s| s.to_string()).collect(),
                            strategy: RoutingStrategy::Rules,
                        }
                    }
                }
            }
        };

        let steps = if profile.steps.is_empty() {
            GENERIC_STEPS.iter().map(|s| s.to_string()).collect()
        } else {
            profile.steps.clone()
        };

        RoutingResult {
            agent: profile.id.clone(),
            confidence: sanitize(confidence),
            reasoning,
            steps,
            strategy: RoutingStrategy::Rules,
        }
    }

    async fn context(&self, goal: &str) -> Vec<SearchHit> {
        let Some(retrieval) = &self.retrieval else {
            return Vec::new();
        };
        if self.context_hits == 0 {
            return Vec::new();
        }
        match retrieval
            .search(KNOWLEDGE, goal, self.context_hits, self.similarity_threshold)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "context retrieval failed; routing without it");
                Vec::new()
            }
        }
    }

    async fn try_reasoning(
        &self,
        reasoner: &dyn ReasoningAdapter,
        goal: &str,
        meta: &Map<String, Value>,
        context: &[SearchHit],
    ) -> Result<RoutingResult> {
        let agents: Vec<AgentSummary> = self
            .profiles
            .iter()
            .map(|p| AgentSummary {
                id: p.id.clone(),
                description: p.description.clone(),
            })
            .collect();
        let snippets: Vec<String> = context.iter().map(|h| snippet(&h.text)).collect();
        let request = ReasoningRequest {
            goal,
            meta,
            context: &snippets,
            agents: &agents,
        };

        let output = tokio::time::timeout(self.reasoning_timeout, reasoner.reason(&request))
            .await
            .map_err(|_| ReasoningError::Timeout(self.reasoning_timeout))??;

        let profile = self
            .profiles
            .get(&output.agent)
            .ok_or_else(|| ReasoningError::UnknownAgent(output.agent.clone()))?;
        if !output.confidence.is_finite() || !(0.0..=1.0).contains(&output.confidence) {
            return Err(ReasoningError::InvalidConfidence(output.confidence).into());
        }

        let steps: Vec<String> = output
            .steps
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let steps = if steps.is_empty() {
            profile.steps.clone()
        } else {
            steps
        };
        let reasoning = if output.reasoning.trim().is_empty() {
            format!("Assigned to '{}' by {}", profile.id, reasoner.name())
        } else {
            output.reasoning
        };

        Ok(RoutingResult {
            agent: profile.id.clone(),
            confidence: output.confidence as f32,
            reasoning,
            steps,
            strategy: RoutingStrategy::Reasoning,
        })
    }
}
