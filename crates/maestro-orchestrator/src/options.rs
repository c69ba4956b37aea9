//! Typed per-pattern options.
//!
//! Options arrive as a JSON object with camelCase keys. Each pattern has its
//! own struct; unknown keys and ill-typed values are rejected with
//! [`MaestroError::InvalidArgument`] before any execution is created.

use crate::profiles;
use crate::types::Pattern;
use maestro_core::{MaestroError, MaestroResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Upper bound on revision passes in the deep research review loop.
pub const MAX_REVISIONS_CAP: u32 = 3;

const MAX_HANDOFFS_CAP: u32 = 50;
const MAX_TURNS_CAP: u32 = 100;
const MAX_STEPS_CAP: u32 = 500;

/// How the concurrent pattern combines member outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationStrategy {
    /// Hand labeled sections to the reducer agent, which writes one answer.
    #[default]
    Merge,
    /// Join labeled sections verbatim; no reducer call.
    Concatenate,
}

/// Which optional stages deep research appends to its core chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchMode {
    /// Core chain only.
    #[default]
    Baseline,
    /// Core chain plus critique/revise loop.
    Reviewer,
    /// Core chain plus analysis stage.
    Analyst,
    /// Every optional stage.
    Full,
}

impl ResearchMode {
    /// Whether the analysis stage runs.
    pub fn has_analyst(&self) -> bool {
        matches!(self, ResearchMode::Analyst | ResearchMode::Full)
    }

    /// Whether the critique/revise loop runs.
    pub fn has_reviewer(&self) -> bool {
        matches!(self, ResearchMode::Reviewer | ResearchMode::Full)
    }

    /// Whether the executive summary stage runs.
    pub fn has_summarizer(&self) -> bool {
        matches!(self, ResearchMode::Full)
    }
}

/// Options for [`Pattern::Sequential`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SequentialOptions {
    /// Ordered chain of roles.
    pub roles: Vec<String>,
    /// Add a final `synthesizer` call over the whole chain.
    pub synthesize: bool,
    /// Roles whose non-transient failures are retried as well.
    #[serde(alias = "retryable_roles")]
    pub retryable_roles: Vec<String>,
}

impl Default for SequentialOptions {
    fn default() -> Self {
        Self {
            roles: owned(profiles::SEQUENTIAL_ROLES),
            synthesize: false,
            retryable_roles: Vec::new(),
        }
    }
}

/// Options for [`Pattern::Concurrent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ConcurrentOptions {
    /// Independent members.
    pub roles: Vec<String>,
    /// Role that merges member outputs.
    pub reducer: String,
    /// How outputs are combined.
    #[serde(alias = "aggregation_strategy")]
    pub aggregation_strategy: AggregationStrategy,
    /// Abort the remaining members and fail on the first member failure.
    #[serde(alias = "all_or_nothing")]
    pub all_or_nothing: bool,
}

impl Default for ConcurrentOptions {
    fn default() -> Self {
        Self {
            roles: owned(profiles::CONCURRENT_ROLES),
            reducer: profiles::SYNTHESIZER.to_string(),
            aggregation_strategy: AggregationStrategy::Merge,
            all_or_nothing: false,
        }
    }
}

/// Options for [`Pattern::Handoff`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct HandoffOptions {
    /// Agent that receives the task first.
    #[serde(alias = "initial_agent")]
    pub initial_agent: String,
    /// Roles control may be handed to.
    pub agents: Vec<String>,
    /// Hard ceiling on transfers.
    #[serde(alias = "max_handoffs")]
    pub max_handoffs: u32,
}

impl Default for HandoffOptions {
    fn default() -> Self {
        Self {
            initial_agent: profiles::HANDOFF_ROLES[0].to_string(),
            agents: owned(profiles::HANDOFF_ROLES),
            max_handoffs: 3,
        }
    }
}

/// Options for [`Pattern::GroupChat`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct GroupChatOptions {
    /// Speakers the moderator chooses from.
    pub participants: Vec<String>,
    /// Role that picks the next speaker.
    pub moderator: String,
    /// Participant turn budget.
    #[serde(alias = "max_turns")]
    pub max_turns: u32,
    /// Flag the result inconclusive when the budget runs out first.
    #[serde(alias = "require_consensus")]
    pub require_consensus: bool,
}

impl Default for GroupChatOptions {
    fn default() -> Self {
        Self {
            participants: owned(profiles::GROUP_CHAT_ROLES),
            moderator: profiles::MODERATOR.to_string(),
            max_turns: 6,
            require_consensus: true,
        }
    }
}

/// Options for [`Pattern::Magentic`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct MagenticOptions {
    /// Roster sub-tasks are dispatched to.
    pub workers: Vec<String>,
    /// Global dispatch budget.
    #[serde(alias = "max_steps")]
    pub max_steps: u32,
    /// Have the validator check every sub-task output.
    pub validate: bool,
}

impl Default for MagenticOptions {
    fn default() -> Self {
        Self {
            workers: owned(profiles::MAGENTIC_WORKERS),
            max_steps: 20,
            validate: true,
        }
    }
}

/// Options for [`Pattern::DeepResearch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct DeepResearchOptions {
    /// Optional stages to run.
    pub mode: ResearchMode,
    /// Sources searched concurrently.
    pub sources: Vec<String>,
    /// Bound on review passes.
    #[serde(alias = "max_revisions")]
    pub max_revisions: u32,
}

impl Default for DeepResearchOptions {
    fn default() -> Self {
        Self {
            mode: ResearchMode::Baseline,
            sources: owned(profiles::RESEARCH_SOURCES),
            max_revisions: 2,
        }
    }
}

/// Validated options, one variant per pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternOptions {
    /// See [`SequentialOptions`].
    Sequential(SequentialOptions),
    /// See [`ConcurrentOptions`].
    Concurrent(ConcurrentOptions),
    /// See [`HandoffOptions`].
    Handoff(HandoffOptions),
    /// See [`GroupChatOptions`].
    GroupChat(GroupChatOptions),
    /// See [`MagenticOptions`].
    Magentic(MagenticOptions),
    /// See [`DeepResearchOptions`].
    DeepResearch(DeepResearchOptions),
}

impl PatternOptions {
    /// Parse and validate `raw` for `pattern`. `null` means all defaults.
    pub fn parse(pattern: Pattern, raw: &serde_json::Value) -> MaestroResult<Self> {
        let options = match pattern {
            Pattern::Sequential => PatternOptions::Sequential(decode(pattern, raw)?),
            Pattern::Concurrent => PatternOptions::Concurrent(decode(pattern, raw)?),
            Pattern::Handoff => PatternOptions::Handoff(decode(pattern, raw)?),
            Pattern::GroupChat => PatternOptions::GroupChat(decode(pattern, raw)?),
            Pattern::Magentic => PatternOptions::Magentic(decode(pattern, raw)?),
            Pattern::DeepResearch => PatternOptions::DeepResearch(decode(pattern, raw)?),
        };
        options.validate()?;
        Ok(options)
    }

    /// The pattern these options belong to.
    pub fn pattern(&self) -> Pattern {
        match self {
            PatternOptions::Sequential(_) => Pattern::Sequential,
            PatternOptions::Concurrent(_) => Pattern::Concurrent,
            PatternOptions::Handoff(_) => Pattern::Handoff,
            PatternOptions::GroupChat(_) => Pattern::GroupChat,
            PatternOptions::Magentic(_) => Pattern::Magentic,
            PatternOptions::DeepResearch(_) => Pattern::DeepResearch,
        }
    }

    fn validate(&self) -> MaestroResult<()> {
        match self {
            PatternOptions::Sequential(o) => {
                check_roster("roles", &o.roles)?;
                check_names("retryableRoles", &o.retryable_roles)
            }
            PatternOptions::Concurrent(o) => {
                check_roster("roles", &o.roles)?;
                check_name("reducer", &o.reducer)
            }
            PatternOptions::Handoff(o) => {
                check_roster("agents", &o.agents)?;
                check_name("initialAgent", &o.initial_agent)?;
                if !o.agents.contains(&o.initial_agent) {
                    return Err(invalid(format!(
                        "initialAgent '{}' is not in agents [{}]",
                        o.initial_agent,
                        o.agents.join(", ")
                    )));
                }
                check_range("maxHandoffs", o.max_handoffs, 0, MAX_HANDOFFS_CAP)
            }
            PatternOptions::GroupChat(o) => {
                check_roster("participants", &o.participants)?;
                check_name("moderator", &o.moderator)?;
                if o.participants.contains(&o.moderator) {
                    return Err(invalid(format!(
                        "moderator '{}' cannot also be a participant",
                        o.moderator
                    )));
                }
                check_range("maxTurns", o.max_turns, 1, MAX_TURNS_CAP)
            }
            PatternOptions::Magentic(o) => {
                check_roster("workers", &o.workers)?;
                check_range("maxSteps", o.max_steps, 1, MAX_STEPS_CAP)
            }
            PatternOptions::DeepResearch(o) => {
                check_roster("sources", &o.sources)?;
                check_range("maxRevisions", o.max_revisions, 1, MAX_REVISIONS_CAP)
            }
        }
    }
}

fn decode<T: DeserializeOwned + Default>(pattern: Pattern, raw: &serde_json::Value) -> MaestroResult<T> {
    match raw {
        serde_json::Value::Null => Ok(T::default()),
        serde_json::Value::Object(_) => serde_json::from_value(raw.clone())
            .map_err(|e| invalid(format!("invalid options for {pattern}: {e}"))),
        other => Err(invalid(format!(
            "options for {pattern} must be a JSON object, got {}",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn check_roster(field: &str, names: &[String]) -> MaestroResult<()> {
    if names.is_empty() {
        return Err(invalid(format!("{field} must not be empty")));
    }
    check_names(field, names)?;
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(invalid(format!("{field} lists '{name}' more than once")));
        }
    }
    Ok(())
}

fn check_names(field: &str, names: &[String]) -> MaestroResult<()> {
    names.iter().try_for_each(|n| check_name(field, n))
}

fn check_name(field: &str, name: &str) -> MaestroResult<()> {
    if name.trim().is_empty() {
        return Err(invalid(format!("{field} contains an empty role name")));
    }
    Ok(())
}

fn check_range(field: &str, value: u32, min: u32, max: u32) -> MaestroResult<()> {
    if value < min || value > max {
        return Err(invalid(format!(
            "{field} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

fn invalid(message: String) -> MaestroError {
    MaestroError::InvalidArgument(message)
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
