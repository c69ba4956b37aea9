use super::{fraction, sections, PatternStrategy};
use crate::context::ExecutionContext;
use crate::options::SequentialOptions;
use crate::profiles::SYNTHESIZER;
use crate::types::{ExecutionResult, Pattern};
use async_trait::async_trait;
use maestro_core::MaestroResult;
use tracing::debug;

/// Fixed chain; each role sees the task plus every earlier labeled output.
pub struct SequentialStrategy {
    options: SequentialOptions,
}

impl SequentialStrategy {
    /// Strategy with validated options.
    pub fn new(options: SequentialOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl PatternStrategy for SequentialStrategy {
    fn pattern(&self) -> Pattern {
        Pattern::Sequential
    }

    async fn run(&self, ctx: &ExecutionContext, task: &str) -> MaestroResult<ExecutionResult> {
        let roles = &self.options.roles;
        let total = roles.len() + usize::from(self.options.synthesize);
        let mut transcript: Vec<(String, String)> = Vec::with_capacity(total);

        for (i, role) in roles.iter().enumerate() {
            let input = step_context(task, &transcript, role);
            let retry_all = self.options.retryable_roles.contains(role);
            let output = ctx.run_step(role, role, input, retry_all).await?;
            debug!(execution_id = %ctx.id(), role = %role, step = i + 1, "Sequential step done");
            transcript.push((role.clone(), output));
            ctx.advance_progress(fraction(i + 1, total))?;
        }

        if self.options.synthesize {
            let input = format!(
                "Task: {task}\n\nContributions:\n\n{}\n\nCombine the contributions into the final answer.",
                labeled(&transcript)
            );
            let output = ctx.run_step(SYNTHESIZER, SYNTHESIZER, input, false).await?;
            return Ok(ExecutionResult::new(output));
        }

        let (_, last) = transcript.pop().unwrap_or_default();
        Ok(ExecutionResult::new(last))
    }
}

fn step_context(task: &str, transcript: &[(String, String)], role: &str) -> String {
    if transcript.is_empty() {
        return format!("Task: {task}\n\nYou are the {role}. You are the first step of the chain.");
    }
    format!(
        "Task: {task}\n\nPrevious work:\n\n{}\n\nYou are the {role}. Build on the previous work.",
        labeled(transcript)
    )
}

fn labeled(transcript: &[(String, String)]) -> String {
    sections(transcript.iter().map(|(r, o)| (r.as_str(), o.as_str())))
}
