//! One strategy per [`Pattern`] variant.

mod concurrent;
mod deep_research;
mod group_chat;
mod handoff;
mod magentic;
mod sequential;

pub use concurrent::ConcurrentStrategy;
pub use deep_research::DeepResearchStrategy;
pub use group_chat::GroupChatStrategy;
pub use handoff::{parse_handoff, HandoffDirective, HandoffStrategy};
pub use magentic::{parse_plan, MagenticStrategy};
pub use sequential::SequentialStrategy;

use crate::consensus::ConsensusPolicy;
use crate::context::ExecutionContext;
use crate::options::PatternOptions;
use crate::types::{ExecutionResult, Pattern};
use async_trait::async_trait;
use maestro_core::MaestroResult;
use std::sync::Arc;

/// Control flow of one pattern.
///
/// `run` drives agent calls through the context (the only writer of the
/// execution record) and returns the final result. Returning an error fails
/// the execution, except [`Cancelled`](maestro_core::MaestroError::Cancelled)
/// which cancels it. Budget exhaustion is not an error: it returns a result
/// with a note.
#[async_trait]
pub trait PatternStrategy: Send + Sync {
    /// The pattern implemented.
    fn pattern(&self) -> Pattern;

    /// Run to completion.
    async fn run(&self, ctx: &ExecutionContext, task: &str) -> MaestroResult<ExecutionResult>;
}

/// Build the strategy for validated `options`.
pub fn strategy_for(
    options: PatternOptions,
    consensus: Arc<dyn ConsensusPolicy>,
) -> Box<dyn PatternStrategy> {
    match options {
        PatternOptions::Sequential(o) => Box::new(SequentialStrategy::new(o)),
        PatternOptions::Concurrent(o) => Box::new(ConcurrentStrategy::new(o)),
        PatternOptions::Handoff(o) => Box::new(HandoffStrategy::new(o)),
        PatternOptions::GroupChat(o) => Box::new(GroupChatStrategy::new(o, consensus)),
        PatternOptions::Magentic(o) => Box::new(MagenticStrategy::new(o)),
        PatternOptions::DeepResearch(o) => Box::new(DeepResearchStrategy::new(o)),
    }
}

/// `### ROLE` headed block.
pub(crate) fn section(label: &str, body: &str) -> String {
    format!("### {}\n{}", label.to_uppercase(), body.trim())
}

/// Labeled blocks joined by blank lines.
pub(crate) fn sections<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    entries
        .into_iter()
        .map(|(label, body)| section(label, body))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `done / total` as a progress fraction.
pub(crate) fn fraction(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    done as f64 / total as f64
}
