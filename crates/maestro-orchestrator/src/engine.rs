use crate::consensus::{ConsensusPolicy, MarkerConsensus};
use crate::context::{AgentCaller, ExecutionContext};
use crate::monitor::AgentMonitor;
use crate::options::PatternOptions;
use crate::profiles::ProfileRegistry;
use crate::status::{StatusChannel, StatusEvent, StatusSubscription};
use crate::store::{ExecutionStore, InMemoryExecutionStore, RetentionPolicy};
use crate::strategies::{strategy_for, PatternStrategy};
use crate::types::{Execution, ExecutionFilter, ExecutionResult, TaskRequest};
use chrono::Utc;
use maestro_agent::{AgentInvoker, AgentSearch, RetryPolicy, RetryingInvoker, SearchProvider};
use maestro_core::{MaestroError, MaestroResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Orchestrator tuning, the `[orchestrator]` section of `maestro.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Concurrent agent calls allowed within one fan-out stage.
    #[serde(default = "default_max_parallel_calls")]
    pub max_parallel_calls: usize,
    /// Per-attempt timeout for agent and search calls.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Snapshots buffered per status subscriber before it starts skipping.
    #[serde(default = "default_status_buffer")]
    pub status_buffer: usize,
    /// Retry behaviour for failed calls.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Eviction of finished executions.
    #[serde(default)]
    pub retention: RetentionPolicy,
}

fn default_max_parallel_calls() -> usize {
    4
}

fn default_call_timeout_ms() -> u64 {
    120_000
}

fn default_status_buffer() -> usize {
    256
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_calls: default_max_parallel_calls(),
            call_timeout_ms: default_call_timeout_ms(),
            status_buffer: default_status_buffer(),
            retry: RetryPolicy::default(),
            retention: RetentionPolicy::default(),
        }
    }
}

/// Entry point: starts executions, cancels them, and answers status queries.
///
/// Each execution runs as its own tokio task. `start` returns as soon as the
/// record exists in `queued`; the task then moves it to a terminal state no
/// matter how the strategy exits.
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn ExecutionStore>,
    status: StatusChannel,
    invoker: Arc<RetryingInvoker>,
    search: Arc<dyn SearchProvider>,
    profiles: Arc<ProfileRegistry>,
    monitor: Arc<AgentMonitor>,
    consensus: Arc<dyn ConsensusPolicy>,
    active: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl Orchestrator {
    /// Orchestrator over `invoker` with an in-memory store, default role
    /// profiles, agent-backed search and marker consensus.
    pub fn new(invoker: Arc<dyn AgentInvoker>, config: OrchestratorConfig) -> Self {
        let retrying = Arc::new(RetryingInvoker::new(
            invoker.clone(),
            config.retry.clone(),
            Duration::from_millis(config.call_timeout_ms),
        ));
        Self {
            status: StatusChannel::new(config.status_buffer),
            store: Arc::new(InMemoryExecutionStore::new()),
            invoker: retrying,
            search: Arc::new(AgentSearch::new(invoker)),
            profiles: Arc::new(ProfileRegistry::defaults()),
            monitor: Arc::new(AgentMonitor::new()),
            consensus: Arc::new(MarkerConsensus),
            active: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Use another record store.
    pub fn with_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = store;
        self
    }

    /// Use another search provider for deep research.
    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = search;
        self
    }

    /// Use other role profiles.
    pub fn with_profiles(mut self, profiles: ProfileRegistry) -> Self {
        self.profiles = Arc::new(profiles);
        self
    }

    /// Use another consensus policy for group chat.
    pub fn with_consensus_policy(mut self, consensus: Arc<dyn ConsensusPolicy>) -> Self {
        self.consensus = consensus;
        self
    }

    /// Settings in effect.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Per-role call metrics.
    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    /// Validate `request`, create its record in `queued` and schedule it.
    ///
    /// Must be called from within a tokio runtime. Rejected requests
    /// ([`MaestroError::InvalidArgument`]) leave no record behind.
    pub fn start(&self, request: TaskRequest) -> MaestroResult<Uuid> {
        if request.task.trim().is_empty() {
            return Err(MaestroError::InvalidArgument("task must not be empty".into()));
        }
        let options = PatternOptions::parse(request.pattern, &request.options)?;
        let strategy = strategy_for(options, self.consensus.clone());

        let execution = self.store.create(&request)?;
        let id = execution.execution_id;
        self.status.publish(execution);

        let token = CancellationToken::new();
        self.active.lock().insert(id, token.clone());
        let caller = AgentCaller::new(
            self.invoker.clone(),
            self.search.clone(),
            self.profiles.clone(),
            self.monitor.clone(),
            token.clone(),
        );
        let ctx = ExecutionContext::new(
            id,
            self.store.clone(),
            self.status.clone(),
            caller,
            token,
            self.config.max_parallel_calls,
        );

        info!(
            execution_id = %id,
            pattern = %request.pattern,
            session_id = %request.session_id,
            "Execution queued"
        );
        tokio::spawn(supervise(ctx, strategy, request.task, self.active.clone()));
        Ok(id)
    }

    /// Request cooperative cancellation. Terminal executions are returned
    /// unchanged; the returned snapshot may still show `running` until the
    /// next checkpoint.
    pub fn cancel(&self, id: Uuid) -> MaestroResult<Execution> {
        let snapshot = self.store.get(id)?;
        if snapshot.is_terminal() {
            debug!(execution_id = %id, status = %snapshot.status, "Cancel on terminal execution ignored");
            return Ok(snapshot);
        }
        if let Some(token) = self.active.lock().get(&id) {
            if !token.is_cancelled() {
                info!(execution_id = %id, "Cancellation requested");
                token.cancel();
            }
        }
        Ok(snapshot)
    }

    /// Snapshot of one execution.
    pub fn status(&self, id: Uuid) -> MaestroResult<Execution> {
        self.store.get(id)
    }

    /// Snapshots matching `filter`, oldest first.
    pub fn list(&self, filter: &ExecutionFilter) -> Vec<Execution> {
        self.store.list(filter)
    }

    /// Push updates for one execution, or for all.
    pub fn subscribe(&self, id: Option<Uuid>) -> StatusSubscription {
        self.status.subscribe(id)
    }

    /// Resolve once `id` is terminal.
    ///
    /// Push updates only wake the waiter; after a lag the store decides.
    pub async fn wait_for_terminal(&self, id: Uuid) -> MaestroResult<Execution> {
        let mut updates = self.subscribe(Some(id));
        let current = self.store.get(id)?;
        if current.is_terminal() {
            return Ok(current);
        }
        while let Some(event) = updates.next().await {
            match event {
                StatusEvent::Snapshot(snapshot) if snapshot.is_terminal() => {
                    return Ok((*snapshot).clone());
                }
                StatusEvent::Snapshot(_) => {}
                StatusEvent::Lagged(skipped) => {
                    let current = self.store.get(id)?;
                    if current.is_terminal() {
                        debug!(execution_id = %id, skipped, "Terminal state found in store after lag");
                        return Ok(current);
                    }
                }
            }
        }
        self.store.get(id)
    }

    /// Evict finished executions per the configured retention policy.
    pub fn evict_expired(&self) -> Vec<Uuid> {
        let evicted = self.store.evict(&self.config.retention, Utc::now());
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted finished executions");
        }
        evicted
    }

    /// Executions whose runner has not finished yet.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

/// Drive one execution and guarantee a terminal state, even if the strategy
/// task panics (with `panic = "unwind"`).
///
/// A cancellation requested before the terminal transition wins over the
/// strategy's own outcome.
async fn supervise(
    ctx: ExecutionContext,
    strategy: Box<dyn PatternStrategy>,
    task: String,
    active: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
) {
    let id = ctx.id();
    let worker = ctx.clone();
    let handle = tokio::spawn(async move { drive(&worker, strategy.as_ref(), &task).await });

    let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(execution_id = %id, error = %e, "Execution task aborted");
            Err(MaestroError::Orchestrator(format!("execution task aborted: {e}")))
        }
    };
    let outcome = if ctx.is_cancelled() && !matches!(outcome, Err(MaestroError::Cancelled)) {
        debug!(execution_id = %id, "Cancellation requested before finish, discarding outcome");
        Err(MaestroError::Cancelled)
    } else {
        outcome
    };
    if let Err(e) = ctx.finish(outcome) {
        error!(execution_id = %id, error = %e, "Could not record terminal state");
    }
    active.lock().remove(&id);
}

async fn drive(
    ctx: &ExecutionContext,
    strategy: &dyn PatternStrategy,
    task: &str,
) -> MaestroResult<ExecutionResult> {
    ctx.checkpoint()?;
    ctx.mark_running()?;
    strategy.run(ctx, task).await
}
