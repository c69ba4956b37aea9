/// Anthropic Messages API backend.
pub mod claude;
/// OpenAI-compatible chat completions backend.
pub mod openai;

use async_trait::async_trait;
use maestro_core::MaestroResult;

/// Trait for LLM provider backends.
///
/// Each provider family implements this trait to handle API communication.
/// To add a new provider:
/// 1. Create a new module in `backends/`
/// 2. Implement `LlmBackend` for your struct
/// 3. Add the variant to `LlmProvider` in `config.rs`
/// 4. Wire it up in `LlmInvoker::new()` in `llm.rs`
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Single-turn completion: system instructions plus one user message.
    async fn complete(&self, system_prompt: &str, user_message: &str) -> MaestroResult<String>;
}
