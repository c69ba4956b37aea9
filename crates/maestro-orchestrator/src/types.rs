use chrono::{DateTime, Utc};
use maestro_core::{ErrorCategory, MaestroError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Control-flow strategy used to coordinate agent calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    /// Fixed ordered chain; each agent builds on the previous outputs.
    Sequential,
    /// Independent agents in parallel, merged by a reducer.
    Concurrent,
    /// Data-driven transfers of control between agents.
    Handoff,
    /// Moderated multi-agent discussion over a shared transcript.
    GroupChat,
    /// Goal-directed decomposition into tracked sub-tasks.
    Magentic,
    /// Multi-stage research pipeline with optional review and analysis.
    DeepResearch,
}

impl Pattern {
    /// Every pattern, in declaration order.
    pub const ALL: [Pattern; 6] = [
        Pattern::Sequential,
        Pattern::Concurrent,
        Pattern::Handoff,
        Pattern::GroupChat,
        Pattern::Magentic,
        Pattern::DeepResearch,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Pattern::Sequential => "sequential",
            Pattern::Concurrent => "concurrent",
            Pattern::Handoff => "handoff",
            Pattern::GroupChat => "group_chat",
            Pattern::Magentic => "magentic",
            Pattern::DeepResearch => "deep_research",
        }
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pattern {
    type Err = MaestroError;

    /// Accepts wire names plus hyphenated and compact spellings
    /// (`group-chat`, `groupchat`, `deep-research`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "sequential" => Ok(Pattern::Sequential),
            "concurrent" => Ok(Pattern::Concurrent),
            "handoff" => Ok(Pattern::Handoff),
            "group_chat" | "groupchat" => Ok(Pattern::GroupChat),
            "magentic" => Ok(Pattern::Magentic),
            "deep_research" | "deepresearch" => Ok(Pattern::DeepResearch),
            _ => Err(MaestroError::InvalidArgument(format!(
                "unknown pattern '{s}' (expected one of: sequential, concurrent, handoff, \
                 group_chat, magentic, deep_research)"
            ))),
        }
    }
}

/// Lifecycle state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Created, strategy not started yet.
    Queued,
    /// Strategy in progress.
    Running,
    /// Finished with a result.
    Completed,
    /// Gave up with an error.
    Failed,
    /// Stopped by a cancellation request.
    Cancelled,
}

impl ExecutionStatus {
    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl FromStr for ExecutionStatus {
    type Err = MaestroError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queued" => Ok(ExecutionStatus::Queued),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" | "canceled" => Ok(ExecutionStatus::Cancelled),
            _ => Err(MaestroError::InvalidArgument(format!("unknown status '{s}'"))),
        }
    }
}

/// One completed unit of agent work. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentActivity {
    /// Role name of the agent.
    pub agent: String,
    /// Context handed to the agent.
    pub input: String,
    /// What the agent returned.
    pub output: String,
    /// When the call completed.
    pub timestamp: DateTime<Utc>,
}

impl AgentActivity {
    /// Stamp an activity with the current time.
    pub fn new(agent: impl Into<String>, input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            input: input.into(),
            output: output.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Final outcome of a completed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// The final text.
    pub output: String,
    /// Set when the pattern finished without the agreement it asked for.
    #[serde(default)]
    pub inconclusive: bool,
    /// Annotations such as budget exhaustion or skipped members.
    #[serde(default)]
    pub notes: Vec<String>,
}

impl ExecutionResult {
    /// A plain result with no annotations.
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            inconclusive: false,
            notes: Vec::new(),
        }
    }

    /// Add an annotation.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Add several annotations.
    pub fn with_notes(mut self, notes: impl IntoIterator<Item = String>) -> Self {
        self.notes.extend(notes);
        self
    }

    /// Flag the result as inconclusive.
    pub fn inconclusive(mut self) -> Self {
        self.inconclusive = true;
        self
    }
}

/// Categorized failure recorded on a failed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Stable category.
    pub category: ErrorCategory,
    /// Human-readable description.
    pub message: String,
}

impl From<&MaestroError> for ExecutionError {
    fn from(err: &MaestroError) -> Self {
        Self {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

/// A request to run a pattern against a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Pattern to run.
    pub pattern: Pattern,
    /// Free-text objective.
    pub task: String,
    /// Opaque grouping label.
    #[serde(default)]
    pub session_id: String,
    /// Pattern-specific options (JSON object, camelCase keys).
    #[serde(default)]
    pub options: serde_json::Value,
}

impl TaskRequest {
    /// A request with default options.
    pub fn new(pattern: Pattern, task: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            pattern,
            task: task.into(),
            session_id: session_id.into(),
            options: serde_json::Value::Null,
        }
    }

    /// Attach options.
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }
}

/// The unit of work, as seen by status readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Unique id, generated at start.
    pub execution_id: Uuid,
    /// Pattern being run.
    pub pattern: Pattern,
    /// The objective.
    pub task: String,
    /// Opaque grouping label.
    pub session_id: String,
    /// Options as submitted.
    pub options: serde_json::Value,
    /// Lifecycle state.
    pub status: ExecutionStatus,
    /// Fraction of work done, never decreasing, in `[0, 1]`.
    pub progress: f64,
    /// What is in flight right now.
    pub current_task: Option<String>,
    /// Creation time.
    pub start_time: DateTime<Utc>,
    /// Terminal transition time.
    pub end_time: Option<DateTime<Utc>>,
    /// Set iff `status == completed`.
    pub result: Option<ExecutionResult>,
    /// Set iff `status == failed`.
    pub error: Option<ExecutionError>,
    /// Sub-task labels that finished, in order.
    pub completed_tasks: Vec<String>,
    /// Sub-task labels that failed, in order.
    pub failed_tasks: Vec<String>,
    /// Agent work in completion order.
    pub agent_outputs: Vec<AgentActivity>,
}

impl Execution {
    /// A fresh `queued` record for `request`.
    pub fn queued(execution_id: Uuid, request: &TaskRequest) -> Self {
        Self {
            execution_id,
            pattern: request.pattern,
            task: request.task.clone(),
            session_id: request.session_id.clone(),
            options: request.options.clone(),
            status: ExecutionStatus::Queued,
            progress: 0.0,
            current_task: None,
            start_time: Utc::now(),
            end_time: None,
            result: None,
            error: None,
            completed_tasks: Vec::new(),
            failed_tasks: Vec::new(),
            agent_outputs: Vec::new(),
        }
    }

    /// Whether the record reached a final state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Selection criteria for history listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionFilter {
    /// Only this status.
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
    /// Only this pattern.
    #[serde(default)]
    pub pattern: Option<Pattern>,
    /// Only this session.
    #[serde(default)]
    pub session_id: Option<String>,
    /// At most this many (newest first).
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ExecutionFilter {
    /// Whether `execution` passes every set criterion.
    pub fn matches(&self, execution: &Execution) -> bool {
        self.status.map_or(true, |s| execution.status == s)
            && self.pattern.map_or(true, |p| execution.pattern == p)
            && self
                .session_id
                .as_deref()
                .map_or(true, |sid| execution.session_id == sid)
    }
}
