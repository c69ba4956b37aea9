use async_trait::async_trait;
use maestro_core::MaestroResult;
use serde::{Deserialize, Serialize};

/// Everything an agent needs for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Role name the agent plays (`planner`, `researcher`, ...).
    pub role: String,
    /// Role instructions; `None` lets the invoker use a generic prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// The input context handed to the agent.
    pub context: String,
    /// Names of tools the agent may use.
    #[serde(default)]
    pub tools: Vec<String>,
}

impl InvocationRequest {
    /// A request with no system prompt and no tools.
    pub fn new(role: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            system_prompt: None,
            context: context.into(),
            tools: Vec::new(),
        }
    }

    /// Attach role instructions.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Attach tool bindings.
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }
}

/// Turns a role plus context into text.
///
/// Implementations may be slow, may fail, and are never assumed to be
/// deterministic. Retries and timeouts are layered on top by
/// [`RetryingInvoker`](crate::RetryingInvoker), so implementations should
/// make exactly one attempt per call.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Run a single agent call.
    async fn invoke(&self, request: &InvocationRequest) -> MaestroResult<String>;
}
