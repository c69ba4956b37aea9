use crate::monitor::AgentMonitor;
use crate::profiles::ProfileRegistry;
use crate::status::StatusChannel;
use crate::store::ExecutionStore;
use crate::types::{AgentActivity, Execution, ExecutionError, ExecutionResult, ExecutionStatus};
use async_trait::async_trait;
use chrono::Utc;
use maestro_agent::{
    AgentInvoker, AgentSearch, InvocationRequest, RetryingInvoker, SearchProvider,
};
use maestro_core::{MaestroError, MaestroResult};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cloneable handle for making agent and search calls.
///
/// Calls go through the retrying invoker and are recorded in the monitor.
/// The caller never touches the execution record, so it can be moved into
/// fan-out tasks freely; results flow back to the [`ExecutionContext`].
#[derive(Clone)]
pub struct AgentCaller {
    invoker: Arc<RetryingInvoker>,
    search: Arc<dyn SearchProvider>,
    profiles: Arc<ProfileRegistry>,
    monitor: Arc<AgentMonitor>,
    cancel: CancellationToken,
}

impl AgentCaller {
    /// Assemble a caller.
    pub fn new(
        invoker: Arc<RetryingInvoker>,
        search: Arc<dyn SearchProvider>,
        profiles: Arc<ProfileRegistry>,
        monitor: Arc<AgentMonitor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            invoker,
            search,
            profiles,
            monitor,
            cancel,
        }
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Invoke `role` with `context`.
    pub async fn call(&self, role: &str, context: &str, retry_all: bool) -> MaestroResult<String> {
        let request = self.profiles.request(role, context);
        self.call_with(self.invoker.as_ref(), &request, retry_all).await
    }

    /// Search `source` for `query`, with the same timeout and retry policy
    /// as agent calls.
    pub async fn search(&self, source: &str, query: &str) -> MaestroResult<String> {
        let adapter = SourceInvoker {
            provider: self.search.clone(),
            source: source.to_string(),
        };
        let retrying = RetryingInvoker::new(
            Arc::new(adapter),
            self.invoker.policy().clone(),
            self.invoker.call_timeout(),
        );
        let request = InvocationRequest::new(AgentSearch::role_for(source), query);
        self.call_with(&retrying, &request, false).await
    }

    async fn call_with(
        &self,
        invoker: &RetryingInvoker,
        request: &InvocationRequest,
        retry_all: bool,
    ) -> MaestroResult<String> {
        self.monitor.start_call(&request.role).await;
        let outcome = invoker.call_until(request, retry_all, &self.cancel).await;
        let duration_ms = u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX);
        self.monitor
            .finish_call(&request.role, outcome.attempts, duration_ms, outcome.result.is_ok())
            .await;
        outcome.result
    }
}

/// Presents one search source as an invoker so the retry layer applies.
struct SourceInvoker {
    provider: Arc<dyn SearchProvider>,
    source: String,
}

#[async_trait]
impl AgentInvoker for SourceInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> MaestroResult<String> {
        self.provider.search(&self.source, &request.context).await
    }
}

/// The single writer for one execution.
///
/// Every mutation goes through the store under its write lock and is
/// published on the status channel afterwards. Mutations are rejected once
/// the record is terminal; progress only moves forward.
#[derive(Clone)]
pub struct ExecutionContext {
    id: Uuid,
    store: Arc<dyn ExecutionStore>,
    status: StatusChannel,
    caller: AgentCaller,
    cancel: CancellationToken,
    max_parallel: usize,
}

impl ExecutionContext {
    /// Writer for execution `id`.
    pub fn new(
        id: Uuid,
        store: Arc<dyn ExecutionStore>,
        status: StatusChannel,
        caller: AgentCaller,
        cancel: CancellationToken,
        max_parallel: usize,
    ) -> Self {
        Self {
            id,
            store,
            status,
            caller,
            cancel,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Execution id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Handle for fan-out calls.
    pub fn caller(&self) -> &AgentCaller {
        &self.caller
    }

    /// Parallelism limit for fan-out stages.
    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails with [`MaestroError::Cancelled`] if cancellation was requested.
    pub fn checkpoint(&self) -> MaestroResult<()> {
        if self.cancel.is_cancelled() {
            debug!(execution_id = %self.id, "Cancellation observed at checkpoint");
            return Err(MaestroError::Cancelled);
        }
        Ok(())
    }

    /// Checkpoint, then describe the step about to run.
    pub fn begin(&self, description: impl Into<String>) -> MaestroResult<()> {
        self.checkpoint()?;
        self.set_current_task(Some(description.into()))
    }

    /// Replace the in-flight description.
    pub fn set_current_task(&self, description: Option<String>) -> MaestroResult<()> {
        self.apply(|e| {
            if e.current_task == description {
                return false;
            }
            e.current_task = description.clone();
            true
        })
    }

    /// Raise progress to `progress`. Lower values are ignored; values are
    /// clamped to `[0, 1]`.
    pub fn advance_progress(&self, progress: f64) -> MaestroResult<()> {
        if progress.is_nan() {
            return Ok(());
        }
        let target = progress.clamp(0.0, 1.0);
        self.apply(|e| {
            if target > e.progress {
                e.progress = target;
                return true;
            }
            false
        })
    }

    /// Append an activity.
    pub fn record_activity(&self, agent: &str, input: &str, output: &str) -> MaestroResult<()> {
        let activity = AgentActivity::new(agent, input, output);
        self.apply(|e| {
            e.agent_outputs.push(activity.clone());
            true
        })
    }

    /// Append a finished sub-task label.
    pub fn complete_task(&self, label: &str) -> MaestroResult<()> {
        self.apply(|e| {
            e.completed_tasks.push(label.to_string());
            true
        })
    }

    /// Append an activity and mark `label` finished, as one change.
    pub fn record_step(
        &self,
        label: &str,
        agent: &str,
        input: &str,
        output: &str,
    ) -> MaestroResult<()> {
        let activity = AgentActivity::new(agent, input, output);
        self.apply(|e| {
            e.agent_outputs.push(activity.clone());
            e.completed_tasks.push(label.to_string());
            true
        })
    }

    /// Append a failed sub-task label.
    pub fn fail_task(&self, label: &str) -> MaestroResult<()> {
        self.apply(|e| {
            e.failed_tasks.push(label.to_string());
            true
        })
    }

    /// One agent call: checkpoint, call, record the activity.
    pub async fn run_agent(&self, role: &str, input: String) -> MaestroResult<String> {
        self.begin(role)?;
        let output = self.caller.call(role, &input, false).await?;
        self.record_activity(role, &input, &output)?;
        Ok(output)
    }

    /// One agent call tracked as sub-task `label`: success lands in
    /// `completed_tasks`, failure in `failed_tasks`.
    pub async fn run_step(
        &self,
        label: &str,
        role: &str,
        input: String,
        retry_all: bool,
    ) -> MaestroResult<String> {
        self.begin(label)?;
        match self.caller.call(role, &input, retry_all).await {
            Ok(output) => {
                self.record_step(label, role, &input, &output)?;
                Ok(output)
            }
            Err(e) => {
                self.fail_task(label)?;
                Err(e)
            }
        }
    }

    /// `queued → running`.
    pub(crate) fn mark_running(&self) -> MaestroResult<()> {
        self.apply(|e| {
            e.status = ExecutionStatus::Running;
            true
        })?;
        info!(execution_id = %self.id, "Execution running");
        Ok(())
    }

    /// Move to the terminal state matching `outcome`. A record that is
    /// already terminal is left untouched.
    pub(crate) fn finish(&self, outcome: MaestroResult<ExecutionResult>) -> MaestroResult<Execution> {
        let mut changed = false;
        let snapshot = self.store.mutate(self.id, &mut |e| {
            if e.is_terminal() {
                return Ok(());
            }
            changed = true;
            e.current_task = None;
            e.end_time = Some(Utc::now());
            match &outcome {
                Ok(result) => {
                    e.status = ExecutionStatus::Completed;
                    e.progress = 1.0;
                    e.result = Some(result.clone());
                }
                Err(MaestroError::Cancelled) => e.status = ExecutionStatus::Cancelled,
                Err(err) => {
                    e.status = ExecutionStatus::Failed;
                    e.error = Some(ExecutionError::from(err));
                }
            }
            Ok(())
        })?;

        if changed {
            match &snapshot.status {
                ExecutionStatus::Failed => warn!(
                    execution_id = %self.id,
                    pattern = %snapshot.pattern,
                    error = snapshot.error.as_ref().map(|e| e.message.as_str()).unwrap_or(""),
                    "Execution failed"
                ),
                status => info!(
                    execution_id = %self.id,
                    pattern = %snapshot.pattern,
                    status = %status,
                    activities = snapshot.agent_outputs.len(),
                    "Execution finished"
                ),
            }
            self.status.publish(snapshot.clone());
        }
        Ok(snapshot)
    }

    /// Apply `delta` under the store lock. `delta` reports whether it
    /// changed anything; unchanged records are not published.
    fn apply(&self, mut delta: impl FnMut(&mut Execution) -> bool) -> MaestroResult<()> {
        let id = self.id;
        let mut changed = false;
        let snapshot = self.store.mutate(id, &mut |e| {
            if e.is_terminal() {
                return Err(MaestroError::Orchestrator(format!(
                    "execution {id} is already {}",
                    e.status
                )));
            }
            changed = delta(e);
            Ok(())
        })?;
        if changed {
            self.status.publish(snapshot);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryExecutionStore;
    use crate::types::{Pattern, TaskRequest};
    use maestro_agent::RetryPolicy;
    use maestro_core::ErrorCategory;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl AgentInvoker for Echo {
        async fn invoke(&self, request: &InvocationRequest) -> MaestroResult<String> {
            if request.role == "broken" {
                return Err(MaestroError::agent("broken", "bad request"));
            }
            Ok(format!("{} says hi", request.role))
        }
    }

    fn context() -> (ExecutionContext, Arc<dyn ExecutionStore>, CancellationToken) {
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let id = store
            .create(&TaskRequest::new(Pattern::Sequential, "t", "s"))
            .unwrap()
            .execution_id;
        let invoker: Arc<dyn AgentInvoker> = Arc::new(Echo);
        let retrying = Arc::new(RetryingInvoker::new(
            invoker.clone(),
            RetryPolicy::none(),
            Duration::from_secs(5),
        ));
        let token = CancellationToken::new();
        let caller = AgentCaller::new(
            retrying,
            Arc::new(AgentSearch::new(invoker)),
            Arc::new(ProfileRegistry::defaults()),
            Arc::new(AgentMonitor::new()),
            token.clone(),
        );
        let ctx = ExecutionContext::new(id, store.clone(), StatusChannel::new(16), caller, token.clone(), 2);
        (ctx, store, token)
    }

    #[tokio::test]
    async fn test_progress_never_decreases_and_is_clamped() {
        let (ctx, store, _) = context();
        ctx.advance_progress(0.5).unwrap();
        ctx.advance_progress(0.2).unwrap();
        assert_eq!(store.get(ctx.id()).unwrap().progress, 0.5);
        ctx.advance_progress(7.0).unwrap();
        assert_eq!(store.get(ctx.id()).unwrap().progress, 1.0);
        ctx.advance_progress(f64::NAN).unwrap();
        assert_eq!(store.get(ctx.id()).unwrap().progress, 1.0);
    }

    #[tokio::test]
    async fn test_run_step_records_activity_and_label() {
        let (ctx, store, _) = context();
        ctx.mark_running().unwrap();
        let out = ctx.run_step("draft", "writer", "ctx".into(), false).await.unwrap();
        assert_eq!(out, "writer says hi");

        let exec = store.get(ctx.id()).unwrap();
        assert_eq!(exec.agent_outputs.len(), 1);
        assert_eq!(exec.agent_outputs[0].agent, "writer");
        assert_eq!(exec.agent_outputs[0].input, "ctx");
        assert_eq!(exec.completed_tasks, vec!["draft".to_string()]);
        assert_eq!(exec.current_task.as_deref(), Some("draft"));
    }

    #[tokio::test]
    async fn test_run_step_failure_records_failed_label() {
        let (ctx, store, _) = context();
        let err = ctx.run_step("fix", "broken", "ctx".into(), false).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::AgentInvocation);
        let exec = store.get(ctx.id()).unwrap();
        assert!(exec.agent_outputs.is_empty());
        assert_eq!(exec.failed_tasks, vec!["fix".to_string()]);
    }

    #[tokio::test]
    async fn test_checkpoint_observes_cancellation() {
        let (ctx, store, token) = context();
        token.cancel();
        let err = ctx.run_agent("writer", "ctx".into()).await.unwrap_err();
        assert!(matches!(err, MaestroError::Cancelled));
        assert!(store.get(ctx.id()).unwrap().agent_outputs.is_empty());
    }

    #[tokio::test]
    async fn test_finish_sets_exclusive_fields() {
        let (ctx, _, _) = context();
        let done = ctx.finish(Ok(ExecutionResult::new("final"))).unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.progress, 1.0);
        assert!(done.result.is_some() && done.error.is_none());
        assert!(done.end_time.is_some());

        let (ctx, _, _) = context();
        let failed = ctx.finish(Err(MaestroError::agent("writer", "boom"))).unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert!(failed.result.is_none());
        assert_eq!(failed.error.unwrap().category, ErrorCategory::AgentInvocation);

        let (ctx, _, _) = context();
        let cancelled = ctx.finish(Err(MaestroError::Cancelled)).unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        assert!(cancelled.result.is_none() && cancelled.error.is_none());
    }

    #[tokio::test]
    async fn test_terminal_is_final() {
        let (ctx, store, _) = context();
        ctx.finish(Ok(ExecutionResult::new("done"))).unwrap();

        assert!(ctx.record_activity("writer", "i", "o").is_err());
        assert!(ctx.complete_task("late").is_err());
        let again = ctx.finish(Err(MaestroError::Cancelled)).unwrap();
        assert_eq!(again.status, ExecutionStatus::Completed);
        assert!(store.get(ctx.id()).unwrap().agent_outputs.is_empty());
    }

    #[tokio::test]
    async fn test_search_uses_searcher_role() {
        let (ctx, _, _) = context();
        let out = ctx.caller().search("news", "ACME").await.unwrap();
        assert_eq!(out, "searcher:news says hi");
    }

    #[tokio::test]
    async fn test_changes_are_published() {
        let (ctx, _, _) = context();
        let mut sub = ctx.status.subscribe(Some(ctx.id()));
        ctx.advance_progress(0.25).unwrap();
        let snapshot = sub.next().await.unwrap().snapshot().unwrap();
        assert_eq!(snapshot.progress, 0.25);
    }

    #[tokio::test]
    async fn test_unchanged_records_are_not_published() {
        let (ctx, _, _) = context();
        ctx.advance_progress(0.5).unwrap();
        ctx.set_current_task(Some("draft".into())).unwrap();
        let mut sub = ctx.status.subscribe(Some(ctx.id()));

        ctx.advance_progress(0.3).unwrap();
        ctx.set_current_task(Some("draft".into())).unwrap();
        ctx.advance_progress(0.75).unwrap();

        let first = sub.next().await.unwrap().snapshot().unwrap();
        assert_eq!(first.progress, 0.75);
    }

    #[tokio::test]
    async fn test_run_step_publishes_activity_and_label_together() {
        let (ctx, _, _) = context();
        ctx.begin("draft").unwrap();
        let mut sub = ctx.status.subscribe(Some(ctx.id()));
        ctx.run_step("draft", "writer", "ctx".into(), false).await.unwrap();

        let snapshot = sub.next().await.unwrap().snapshot().unwrap();
        assert_eq!(snapshot.agent_outputs.len(), 1);
        assert_eq!(snapshot.completed_tasks, vec!["draft".to_string()]);
    }
}
