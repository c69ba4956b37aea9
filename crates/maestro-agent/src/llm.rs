use crate::backends::claude::ClaudeBackend;
use crate::backends::openai::OpenAiBackend;
use crate::backends::LlmBackend;
use crate::config::{LlmProvider, ModelConfig};
use crate::invoker::{AgentInvoker, InvocationRequest};
use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult};
use tracing::debug;

const GENERIC_PROMPT: &str = "You are a member of a team of collaborating agents. \
Answer the request you are given directly and completely.";

/// [`AgentInvoker`] that calls an LLM provider over HTTP.
///
/// Uses the `LlmBackend` trait to abstract away provider-specific API
/// differences. Each call is a single attempt; wrap it in a
/// [`RetryingInvoker`](crate::RetryingInvoker) for retries and timeouts.
pub struct LlmInvoker {
    backend: Box<dyn LlmBackend>,
}

impl LlmInvoker {
    /// Pick the backend matching `config.provider`.
    pub fn new(config: ModelConfig) -> Self {
        let backend: Box<dyn LlmBackend> = match config.provider {
            LlmProvider::Claude => Box::new(ClaudeBackend::new(config)),
            LlmProvider::OpenAi | LlmProvider::OpenRouter | LlmProvider::Groq => {
                Box::new(OpenAiBackend::new(config))
            }
        };
        Self { backend }
    }

    /// Create from a pre-built backend (for custom/external providers).
    pub fn from_backend(backend: Box<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

/// System prompt for a request: role instructions plus the tool list.
pub fn system_prompt_for(request: &InvocationRequest) -> String {
    let mut prompt = request
        .system_prompt
        .clone()
        .unwrap_or_else(|| format!("{GENERIC_PROMPT} Your role: {}.", request.role));

    if !request.tools.is_empty() {
        prompt.push_str("\n\nTools available to you: ");
        prompt.push_str(&request.tools.join(", "));
    }
    prompt
}

#[async_trait]
impl AgentInvoker for LlmInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> MaestroResult<String> {
        debug!(role = %request.role, context_len = request.context.len(), "Invoking LLM");
        let system = system_prompt_for(request);
        let text = self.backend.complete(&system, &request.context).await?;

        if text.trim().is_empty() {
            return Err(MaestroError::agent(&request.role, "empty completion"));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_defaults_to_generic() {
        let req = InvocationRequest::new("researcher", "ctx");
        let prompt = system_prompt_for(&req);
        assert!(prompt.contains("Your role: researcher."));
        assert!(!prompt.contains("Tools available"));
    }

    #[test]
    fn test_system_prompt_lists_tools() {
        let req = InvocationRequest::new("researcher", "ctx")
            .with_system_prompt("Find facts.")
            .with_tools(vec!["web_search".into(), "calculator".into()]);
        let prompt = system_prompt_for(&req);
        assert!(prompt.starts_with("Find facts."));
        assert!(prompt.ends_with("web_search, calculator"));
    }
}
