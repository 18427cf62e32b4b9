//! Capability scoring for the task router.
//!
//! Each [`CapabilityProfile`] describes one agent by a keyword set and a
//! set of regex patterns. A goal is scored against every profile:
//!
//! ```text
//! keyword = |keywords ∩ words(goal)| / |keywords|
//! pattern = |patterns matching goal| / |patterns|
//! score   = clamp(w_k · keyword + w_r · pattern, 0, 1)
//! ```
//!
//! The highest score wins; ties go to the lower declared `priority`,
//! then to the profile registered first. Everything here is pure and
//! deterministic; the service layer adds the confidence floor, the
//! optional reasoning adapter, and retrieval hints.

use std::collections::HashSet;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedding::words;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("profile '{agent}': invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        agent: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("duplicate profile id '{0}'")]
    DuplicateProfile(String),
    #[error("profile id must not be empty")]
    EmptyId,
    #[error("at least one capability profile is required")]
    NoProfiles,
    #[error("invalid scoring weights: {0}")]
    InvalidWeights(String),
}

/// Declarative profile, as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSpec {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Lower wins ties.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub steps: Vec<String>,
}

fn default_priority() -> i32 {
    100
}

/// A profile with normalized keywords and compiled patterns.
#[derive(Debug, Clone)]
pub struct CapabilityProfile {
    pub id: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub patterns: Vec<Regex>,
    pub priority: i32,
    pub steps: Vec<String>,
}

impl CapabilityProfile {
    /// Compile a [`ProfileSpec`]. Patterns are case-insensitive.
    pub fn compile(spec: &ProfileSpec) -> Result<Self, RoutingError> {
        let id = spec.id.trim().to_lowercase();
        if id.is_empty() {
            return Err(RoutingError::EmptyId);
        }

        let mut keywords: Vec<String> = spec
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let mut seen = HashSet::new();
        keywords.retain(|k| seen.insert(k.clone()));

        let patterns = spec
            .patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| RoutingError::InvalidPattern {
                        agent: id.clone(),
                        pattern: p.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id,
            description: spec.description.clone(),
            keywords,
            patterns,
            priority: spec.priority,
            steps: spec.steps.clone(),
        })
    }

    /// Fraction of this profile's keywords present as words in the goal.
    pub fn keyword_score(&self, goal_words: &HashSet<String>) -> f32 {
        if self.keywords.is_empty() {
            return 0.0;
        }
        let hits = self
            .keywords
            .iter()
            .filter(|k| goal_words.contains(k.as_str()))
            .count();
        hits as f32 / self.keywords.len() as f32
    }

    /// Fraction of this profile's patterns that match the goal.
    pub fn pattern_score(&self, goal: &str) -> f32 {
        if self.patterns.is_empty() {
            return 0.0;
        }
        let hits = self.patterns.iter().filter(|p| p.is_match(goal)).count();
        hits as f32 / self.patterns.len() as f32
    }
}

/// Relative weight of keyword and pattern evidence. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub keyword: f32,
    pub pattern: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            keyword: 0.5,
            pattern: 0.5,
        }
    }
}

impl ScoringWeights {
    pub fn new(keyword: f32, pattern: f32) -> Result<Self, RoutingError> {
        let w = Self { keyword, pattern };
        w.validate()?;
        Ok(w)
    }

    pub fn validate(&self) -> Result<(), RoutingError> {
        if !(self.keyword.is_finite() && self.pattern.is_finite()) {
            return Err(RoutingError::InvalidWeights("weights must be finite".into()));
        }
        if self.keyword < 0.0 || self.pattern < 0.0 {
            return Err(RoutingError::InvalidWeights(
                "weights must be non-negative".into(),
            ));
        }
        if ((self.keyword + self.pattern) - 1.0).abs() > 1e-4 {
            return Err(RoutingError::InvalidWeights(format!(
                "keyword ({}) + pattern ({}) must equal 1",
                self.keyword, self.pattern
            )));
        }
        Ok(())
    }
}

/// Score breakdown of one profile for one goal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileScore {
    pub agent: String,
    pub keyword: f32,
    pub pattern: f32,
    pub score: f32,
}

/// Ordered, id-unique set of profiles.
#[derive(Debug, Clone)]
pub struct ProfileSet {
    profiles: Vec<CapabilityProfile>,
}

impl ProfileSet {
    /// Compile and register profiles in the given order.
    pub fn compile(specs: &[ProfileSpec]) -> Result<Self, RoutingError> {
        if specs.is_empty() {
            return Err(RoutingError::NoProfiles);
        }
        let mut profiles: Vec<CapabilityProfile> = Vec::with_capacity(specs.len());
        for spec in specs {
            let profile = CapabilityProfile::compile(spec)?;
            if profiles.iter().any(|p| p.id == profile.id) {
                return Err(RoutingError::DuplicateProfile(profile.id));
            }
            profiles.push(profile);
        }
        Ok(Self { profiles })
    }

    /// Look up a profile by id, case-insensitively.
    pub fn get(&self, id: &str) -> Option<&CapabilityProfile> {
        let id = id.trim().to_lowercase();
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.profiles.iter().map(|p| p.id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapabilityProfile> {
        self.profiles.iter()
    }

    /// Score every profile, in registration order.
    pub fn score_all(&self, goal: &str, weights: &ScoringWeights) -> Vec<ProfileScore> {
        let goal_words: HashSet<String> = words(goal).into_iter().collect();
        self.profiles
            .iter()
            .map(|p| {
                let keyword = p.keyword_score(&goal_words);
                let pattern = p.pattern_score(goal);
                let raw = weights.keyword * keyword + weights.pattern * pattern;
                let score = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };
                ProfileScore {
                    agent: p.id.clone(),
                    keyword,
                    pattern,
                    score,
                }
            })
            .collect()
    }

    /// The winning profile and its score.
    pub fn best(
        &self,
        goal: &str,
        weights: &ScoringWeights,
    ) -> Option<(&CapabilityProfile, ProfileScore)> {
        let scores = self.score_all(goal, weights);
        let mut winner: Option<usize> = None;
        for (i, s) in scores.iter().enumerate() {
            winner = match winner {
                None => Some(i),
                Some(w) => {
                    let current = &scores[w];
                    let better = s.score > current.score
                        || (s.score == current.score
                            && self.profiles[i].priority < self.profiles[w].priority);
                    if better {
                        Some(i)
                    } else {
                        Some(w)
                    }
                }
            };
        }
        winner.map(|i| (&self.profiles[i], scores[i].clone()))
    }
}

/// How a routing decision was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    Rules,
    Reasoning,
}

/// The router's decision for one goal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingResult {
    pub agent: String,
    /// Always in `[0, 1]`.
    pub confidence: f32,
    pub reasoning: String,
    pub steps: Vec<String>,
    pub strategy: RoutingStrategy,
}

fn spec(
    id: &str,
    description: &str,
    keywords: &[&str],
    patterns: &[&str],
    priority: i32,
    steps: &[&str],
) -> ProfileSpec {
    let owned = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    ProfileSpec {
        id: id.to_string(),
        description: description.to_string(),
        keywords: owned(keywords),
        patterns: owned(patterns),
        priority,
        steps: owned(steps),
    }
}

/// Built-in profiles used when configuration declares none.
pub fn default_profiles() -> Vec<ProfileSpec> {
    vec![
        spec(
            "general",
            "General coding tasks, file operations, and project management",
            &[
                "create", "implement", "write", "edit", "refactor", "update", "add", "design",
                "document", "fix",
            ],
            &[
                r"\b(create|implement|write|edit|modify|update)\b.*\b(file|function|class|module|component)\b",
                r"\b(add|remove|refactor|optimize)\b.*\b(code|logic|structure)\b",
                r"\b(plan|design|structure|architecture)\b.*\b(system|application|project)\b",
            ],
            30,
            &[
                "Analyze task requirements",
                "Implement solution",
                "Test functionality",
            ],
        ),
        spec(
            "tests",
            "Test creation, execution, and quality assurance",
            &["test", "tests", "unit", "testing", "pytest"],
            &[
                r"\b(test|tests|testing|unittest|pytest)\b",
                r"\b(unit|integration|functional|e2e|regression)\b",
                r"\b(write|add|create|generate)\b.*\btests?\b",
            ],
            10,
            &[
                "Identify the behavior under test",
                "Write failing test cases",
                "Add fixtures and mocks for dependencies",
                "Run the suite and check coverage",
            ],
        ),
        spec(
            "db",
            "Database operations, schema design, and data management",
            &["database", "db", "sql", "query", "schema", "migration", "table", "index"],
            &[
                r"\b(database|db|sql|query|table|schema)\b",
                r"\b(model|orm|migration|data|storage)\b",
                r"\b(insert|update|delete|select|join)\b",
            ],
            20,
            &[
                "Review the current schema",
                "Design the schema or query change",
                "Write and apply the migration",
                "Verify data integrity",
            ],
        ),
    ]
}
