use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A convenience `Result` alias using [`MaestroError`].
pub type MaestroResult<T> = Result<T, MaestroError>;

/// Top-level error type for the Maestro workspace.
#[derive(Error, Debug)]
pub enum MaestroError {
    /// A request was rejected before any execution was created
    /// (unknown pattern, malformed options, empty task).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An execution id (or other keyed resource) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A single agent call failed.
    #[error("Agent invocation failed ({role}): {message}")]
    AgentInvocation {
        /// Role of the agent that failed.
        role: String,
        /// Failure description from the invoker.
        message: String,
    },

    /// A single agent call exceeded its per-call timeout.
    #[error("Agent call timed out ({role}) after {after_ms}ms")]
    Timeout {
        /// Role of the agent that timed out.
        role: String,
        /// The timeout that elapsed, in milliseconds.
        after_ms: u64,
    },

    /// The execution observed a cancellation request at a checkpoint.
    #[error("Execution cancelled")]
    Cancelled,

    /// An error from an outbound HTTP request (LLM API call).
    #[error("HTTP error: {0}")]
    Http(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An internal orchestrator failure (store invariant, join failure).
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MaestroError {
    /// Shorthand for [`MaestroError::AgentInvocation`].
    pub fn agent(role: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AgentInvocation {
            role: role.into(),
            message: message.into(),
        }
    }

    /// Stable category of this error, as recorded on failed executions and
    /// returned in gateway error bodies.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MaestroError::InvalidArgument(_) => ErrorCategory::InvalidArgument,
            MaestroError::NotFound(_) => ErrorCategory::NotFound,
            MaestroError::AgentInvocation { .. } | MaestroError::Http(_) => {
                ErrorCategory::AgentInvocation
            }
            MaestroError::Timeout { .. } => ErrorCategory::Timeout,
            MaestroError::Cancelled => ErrorCategory::Cancelled,
            MaestroError::Config(_)
            | MaestroError::Orchestrator(_)
            | MaestroError::Json(_)
            | MaestroError::Io(_) => ErrorCategory::Internal,
        }
    }
}

/// Stable classification of a [`MaestroError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Rejected input; nothing was created.
    InvalidArgument,
    /// Unknown execution id.
    NotFound,
    /// An agent call failed and retries were exhausted.
    AgentInvocation,
    /// An agent call timed out and retries were exhausted.
    Timeout,
    /// Cooperative cancellation.
    Cancelled,
    /// Anything else.
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::InvalidArgument => "invalid_argument",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::AgentInvocation => "agent_invocation",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(name)
    }
}
