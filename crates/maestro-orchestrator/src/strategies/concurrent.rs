use super::{fraction, sections, PatternStrategy};
use crate::context::ExecutionContext;
use crate::options::{AggregationStrategy, ConcurrentOptions};
use crate::types::{ExecutionResult, Pattern};
use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Independent members with the same base context, joined, then reduced.
pub struct ConcurrentStrategy {
    options: ConcurrentOptions,
}

impl ConcurrentStrategy {
    /// Strategy with validated options.
    pub fn new(options: ConcurrentOptions) -> Self {
        Self { options }
    }

    fn aggregation_input(task: &str, merged: &str) -> String {
        format!(
            "Task: {task}\n\nIndependent analyses:\n\n{merged}\n\n\
             Merge these into one answer. Keep a labeled section per analysis \
             and finish with an overall conclusion."
        )
    }
}

#[async_trait]
impl PatternStrategy for ConcurrentStrategy {
    fn pattern(&self) -> Pattern {
        Pattern::Concurrent
    }

    async fn run(&self, ctx: &ExecutionContext, task: &str) -> MaestroResult<ExecutionResult> {
        let roles = &self.options.roles;
        let members = roles.len();
        let base = format!(
            "Task: {task}\n\nAnalyse the task independently from your own angle. \
             Other analysts cover the other angles."
        );
        ctx.begin(format!("running {members} agents concurrently"))?;

        let permits = Arc::new(Semaphore::new(ctx.max_parallel()));
        let mut set = JoinSet::new();
        for role in roles.iter().cloned() {
            let caller = ctx.caller().clone();
            let permits = permits.clone();
            let input = base.clone();
            set.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) if caller.is_cancelled() => Err(MaestroError::Cancelled),
                    Ok(_permit) => caller.call(&role, &input, false).await,
                    Err(_) => Err(MaestroError::Orchestrator("concurrency limiter closed".into())),
                };
                (role, input, result)
            });
        }

        let mut outputs: Vec<(String, String)> = Vec::with_capacity(members);
        let mut failures: Vec<(String, MaestroError)> = Vec::new();
        let mut joined = 0;
        while let Some(next) = set.join_next().await {
            let (role, input, result) = next.map_err(|e| {
                MaestroError::Orchestrator(format!("concurrent member task failed: {e}"))
            })?;
            joined += 1;
            match result {
                Ok(output) => {
                    ctx.record_step(&role, &role, &input, &output)?;
                    outputs.push((role, output));
                }
                // skipped after a cancellation request; the checkpoint below reports it
                Err(MaestroError::Cancelled) => {}
                Err(err) => {
                    ctx.fail_task(&role)?;
                    if self.options.all_or_nothing {
                        warn!(execution_id = %ctx.id(), role = %role, error = %err, "Member failed, aborting the rest");
                        set.abort_all();
                        return Err(err);
                    }
                    warn!(execution_id = %ctx.id(), role = %role, error = %err, "Member failed, continuing");
                    failures.push((role, err));
                }
            }
            ctx.advance_progress(fraction(joined, members + 1))?;
        }
        ctx.checkpoint()?;

        if outputs.is_empty() {
            return Err(failures
                .into_iter()
                .next()
                .map(|(_, e)| e)
                .unwrap_or_else(|| MaestroError::Orchestrator("no concurrent member produced output".into())));
        }
        info!(
            execution_id = %ctx.id(),
            succeeded = outputs.len(),
            failed = failures.len(),
            "Concurrent join complete"
        );

        outputs.sort_by_key(|(role, _)| roles.iter().position(|r| r == role));
        let merged = sections(outputs.iter().map(|(r, o)| (r.as_str(), o.as_str())));
        let notes: Vec<String> = failures
            .iter()
            .map(|(role, err)| format!("member '{role}' failed: {err}"))
            .collect();

        let output = match self.options.aggregation_strategy {
            AggregationStrategy::Concatenate => merged,
            AggregationStrategy::Merge => {
                let reducer = &self.options.reducer;
                ctx.run_step(reducer, reducer, Self::aggregation_input(task, &merged), false)
                    .await?
            }
        };
        Ok(ExecutionResult::new(output).with_notes(notes))
    }
}
