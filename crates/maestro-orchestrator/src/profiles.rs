use crate::types::Pattern;
use maestro_agent::InvocationRequest;
use serde::Serialize;
use std::collections::HashMap;

/// Default sequential chain.
pub const SEQUENTIAL_ROLES: &[&str] = &["planner", "researcher", "writer", "reviewer"];
/// Default concurrent members.
pub const CONCURRENT_ROLES: &[&str] =
    &["fundamental_analyst", "technical_analyst", "sentiment_analyst"];
/// Default handoff roster; the first entry is the initial agent.
pub const HANDOFF_ROLES: &[&str] = &["triage", "researcher", "analyst", "writer"];
/// Default group chat participants.
pub const GROUP_CHAT_ROLES: &[&str] = &["optimist", "skeptic", "analyst"];
/// Default magentic workers.
pub const MAGENTIC_WORKERS: &[&str] = &["researcher", "analyst", "writer"];
/// Default deep research sources.
pub const RESEARCH_SOURCES: &[&str] = &["web", "news", "filings"];

/// Merges concurrent outputs and optionally ends a sequential chain.
pub const SYNTHESIZER: &str = "synthesizer";
/// Picks group chat speakers.
pub const MODERATOR: &str = "moderator";
/// Decomposes tasks (sequential, magentic, deep research).
pub const PLANNER: &str = "planner";
/// Synthesizes magentic sub-task results.
pub const MANAGER: &str = "manager";
/// Checks magentic sub-task outputs.
pub const VALIDATOR: &str = "validator";
/// Gathers material in deep research.
pub const RESEARCHER: &str = "researcher";
/// Drafts and revises the deep research report.
pub const WRITER: &str = "writer";
/// Critiques the deep research report.
pub const REVIEWER: &str = "reviewer";
/// Deep research analysis stage.
pub const ANALYST: &str = "analyst";
/// Deep research executive summary.
pub const SUMMARIZER: &str = "summarizer";

/// Instructions and tool bindings for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    /// Role name.
    pub role: String,
    /// System prompt sent with every call for this role.
    pub system_prompt: String,
    /// Tools the role may use.
    pub tools: Vec<String>,
}

impl AgentProfile {
    /// Build a profile.
    pub fn new(role: impl Into<String>, system_prompt: impl Into<String>, tools: &[&str]) -> Self {
        Self {
            role: role.into(),
            system_prompt: system_prompt.into(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Role name → profile lookup used to build invocation requests.
///
/// Roles without a profile still work: the request goes out without a
/// system prompt and the invoker falls back to a generic one.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<String, AgentProfile>,
}

impl ProfileRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in roles used by the default rosters.
    pub fn defaults() -> Self {
        let mut registry = Self::empty();
        for profile in default_profiles() {
            registry.insert(profile);
        }
        registry
    }

    /// Add or replace a profile.
    pub fn insert(&mut self, profile: AgentProfile) {
        self.profiles.insert(profile.role.clone(), profile);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_profile(mut self, profile: AgentProfile) -> Self {
        self.insert(profile);
        self
    }

    /// Profile for `role`, if any.
    pub fn get(&self, role: &str) -> Option<&AgentProfile> {
        self.profiles.get(role)
    }

    /// Number of registered roles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether no roles are registered.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Build the invocation request for `role` with `context`.
    pub fn request(&self, role: &str, context: impl Into<String>) -> InvocationRequest {
        let request = InvocationRequest::new(role, context);
        match self.get(role) {
            Some(profile) => request
                .with_system_prompt(profile.system_prompt.clone())
                .with_tools(profile.tools.clone()),
            None => request,
        }
    }
}

/// Default roster of a pattern, for listings.
pub fn default_roster(pattern: Pattern) -> Vec<&'static str> {
    match pattern {
        Pattern::Sequential => SEQUENTIAL_ROLES.to_vec(),
        Pattern::Concurrent => {
            let mut roles = CONCURRENT_ROLES.to_vec();
            roles.push(SYNTHESIZER);
            roles
        }
        Pattern::Handoff => HANDOFF_ROLES.to_vec(),
        Pattern::GroupChat => {
            let mut roles = vec![MODERATOR];
            roles.extend_from_slice(GROUP_CHAT_ROLES);
            roles
        }
        Pattern::Magentic => {
            let mut roles = vec![PLANNER];
            roles.extend_from_slice(MAGENTIC_WORKERS);
            roles.extend_from_slice(&[VALIDATOR, MANAGER]);
            roles
        }
        Pattern::DeepResearch => vec![PLANNER, RESEARCHER, WRITER, ANALYST, REVIEWER, SUMMARIZER],
    }
}

/// One-line description of a pattern, for listings.
pub fn describe(pattern: Pattern) -> &'static str {
    match pattern {
        Pattern::Sequential => "Ordered chain; each agent builds on every prior output.",
        Pattern::Concurrent => "Independent agents in parallel, merged by a reducer.",
        Pattern::Handoff => "Agents transfer control with HANDOFF directives, bounded by maxHandoffs.",
        Pattern::GroupChat => "Moderated discussion until consensus or maxTurns.",
        Pattern::Magentic => "Planner decomposes the goal; workers resolve tracked sub-tasks.",
        Pattern::DeepResearch => "Plan, research, multi-source search, write; optional review and analysis.",
    }
}

/// Listing entry for one pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternInfo {
    /// Wire name.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Roles used when options do not override them.
    pub default_roles: Vec<&'static str>,
}

/// Every pattern with its description and default roster.
pub fn catalog() -> Vec<PatternInfo> {
    Pattern::ALL
        .iter()
        .map(|p| PatternInfo {
            name: p.as_str(),
            description: describe(*p),
            default_roles: default_roster(*p),
        })
        .collect()
}

fn default_profiles() -> Vec<AgentProfile> {
    vec![
        AgentProfile::new(PLANNER, PLANNER_PROMPT, &[]),
        AgentProfile::new(RESEARCHER, RESEARCHER_PROMPT, &["web_search"]),
        AgentProfile::new(WRITER, WRITER_PROMPT, &[]),
        AgentProfile::new(REVIEWER, REVIEWER_PROMPT, &[]),
        AgentProfile::new(SYNTHESIZER, SYNTHESIZER_PROMPT, &[]),
        AgentProfile::new(
            "fundamental_analyst",
            analyst_prompt("fundamentals: revenue, margins, balance sheet and valuation"),
            &["filings_search"],
        ),
        AgentProfile::new(
            "technical_analyst",
            analyst_prompt("price action, trend, momentum and volume"),
            &["market_data"],
        ),
        AgentProfile::new(
            "sentiment_analyst",
            analyst_prompt("news flow, market sentiment and narrative risk"),
            &["news_search"],
        ),
        AgentProfile::new("triage", TRIAGE_PROMPT, &[]),
        AgentProfile::new(ANALYST, ANALYST_PROMPT, &["market_data"]),
        AgentProfile::new("optimist", participant_prompt("the strongest case in favour"), &[]),
        AgentProfile::new("skeptic", participant_prompt("risks, weaknesses and counter-evidence"), &[]),
        AgentProfile::new(MODERATOR, MODERATOR_PROMPT, &[]),
        AgentProfile::new(MANAGER, MANAGER_PROMPT, &[]),
        AgentProfile::new(VALIDATOR, VALIDATOR_PROMPT, &[]),
        AgentProfile::new(SUMMARIZER, SUMMARIZER_PROMPT, &[]),
    ]
}

fn analyst_prompt(focus: &str) -> String {
    format!(
        "You are an independent analyst focused on {focus}. \
         Work only from the task; other analysts cover other angles. \
         Finish with a one-line conclusion."
    )
}

fn participant_prompt(stance: &str) -> String {
    format!(
        "You take part in a moderated discussion and argue {stance}. \
         Respond to specific points in the transcript. If you believe the group \
         has converged, start a line with `CONSENSUS:` followed by the agreed position."
    )
}

const PLANNER_PROMPT: &str = "\
You are the Planner. Break the task into a short numbered list of concrete \
sub-tasks, one per line. You may prefix a line with a role in brackets, \
for example `1. [researcher] Collect the last four quarterly filings`.
";

const RESEARCHER_PROMPT: &str = "\
You are the Researcher. Gather the facts the plan calls for and cite where \
each one comes from. Separate established facts from estimates.
";

const WRITER_PROMPT: &str = "\
You are the Writer. Turn the material you are given into a clear, structured \
report with headings. When a critique is provided, revise the report to \
address every point it raises.
";

const REVIEWER_PROMPT: &str = "\
You are the Reviewer. Critique the report for accuracy, gaps and unsupported \
claims. If it needs no further changes, start your reply with `APPROVED`.
";

const SYNTHESIZER_PROMPT: &str = "\
You are the Synthesizer. Merge the labeled contributions into one coherent \
answer. Keep a section per contribution where they disagree.
";

const TRIAGE_PROMPT: &str = "\
You are the Triage agent. Decide which specialist should handle the task. \
To transfer control, end with a line `HANDOFF: <role> | <reason>`. \
If you can answer directly, answer without a handoff line.
";

const ANALYST_PROMPT: &str = "\
You are the Analyst. Work with the structured data you are given: compute \
ratios, compare periods and flag anomalies. Present numbers in tables.
";

const MODERATOR_PROMPT: &str = "\
You are the Moderator of a discussion. Each turn reply with exactly one line \
`NEXT: <participant>` naming who speaks next. When the participants agree, \
reply `CONSENSUS: <agreed position>` instead.
";

const MANAGER_PROMPT: &str = "\
You are the Manager. Combine the results of the completed sub-tasks into a \
final answer to the original goal. Mention any sub-task that could not be \
completed.
";

const VALIDATOR_PROMPT: &str = "\
You are the Validator. Check whether the output fully resolves its sub-task. \
Reply `ACCEPT` or `REJECT: <reason>`.
";

const SUMMARIZER_PROMPT: &str = "\
You are the Summarizer. Write a five-line executive summary of the report \
for a reader with one minute to spare.
";
