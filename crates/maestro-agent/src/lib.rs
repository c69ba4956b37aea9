//! Agent invocation for Maestro.
//!
//! The orchestrator treats agents as an opaque collaborator: given a role and
//! an input context it returns text, asynchronously, and sometimes fails.
//!
//! # Main types
//!
//! - [`AgentInvoker`] — The invocation contract every strategy calls through.
//! - [`RetryingInvoker`] — Per-call timeout plus bounded, backed-off retries.
//! - [`LlmInvoker`] — HTTP invoker for Claude and OpenAI-compatible APIs.
//! - [`SearchProvider`] — Multi-source search used by deep research.

/// LLM provider backends.
pub mod backends;
/// Model configuration.
pub mod config;
/// The agent invocation contract.
pub mod invoker;
/// HTTP-backed invoker.
pub mod llm;
/// Timeout and retry policy.
pub mod retry;
/// Search capability.
pub mod search;

pub use config::{LlmProvider, ModelConfig};
pub use invoker::{AgentInvoker, InvocationRequest};
pub use llm::LlmInvoker;
pub use retry::{is_retryable, CallOutcome, RetryPolicy, RetryingInvoker};
pub use search::{AgentSearch, SearchProvider};
