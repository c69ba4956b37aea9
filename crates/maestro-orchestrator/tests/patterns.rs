#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use maestro_agent::{AgentInvoker, InvocationRequest, RetryPolicy};
use maestro_core::{ErrorCategory, MaestroError, MaestroResult};
use maestro_orchestrator::{
    Execution, ExecutionFilter, ExecutionStatus, Orchestrator, OrchestratorConfig, Pattern,
    TaskRequest,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

type Respond = Box<dyn Fn(&InvocationRequest) -> MaestroResult<String> + Send + Sync>;

/// Invoker driven by a per-test script. Records every attempt by role and
/// can hold calls for one role until released.
struct ScriptedInvoker {
    respond: Respond,
    calls: Mutex<Vec<String>>,
    gate: Option<(String, Arc<Notify>)>,
}

impl ScriptedInvoker {
    fn new(respond: impl Fn(&InvocationRequest) -> MaestroResult<String> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    fn gated(mut self, role: &str, gate: Arc<Notify>) -> Self {
        self.gate = Some((role.to_string(), gate));
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn calls_for(&self, role: &str) -> usize {
        self.calls.lock().iter().filter(|r| r.as_str() == role).count()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> MaestroResult<String> {
        self.calls.lock().push(request.role.clone());
        if let Some((role, gate)) = &self.gate {
            if *role == request.role {
                gate.notified().await;
            }
        }
        (self.respond)(request)
    }
}

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        call_timeout_ms: 5_000,
        retry: RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
        },
        ..Default::default()
    }
}

fn orchestrator(invoker: Arc<ScriptedInvoker>) -> Orchestrator {
    Orchestrator::new(invoker, test_config())
}

async fn run(orch: &Orchestrator, request: TaskRequest) -> Execution {
    let id = orch.start(request).unwrap();
    let done = tokio::time::timeout(Duration::from_secs(10), orch.wait_for_terminal(id))
        .await
        .expect("execution did not finish")
        .unwrap();
    assert_terminal_invariants(&done);
    assert_eq!(orch.status(id).unwrap(), done);
    done
}

fn assert_terminal_invariants(exec: &Execution) {
    assert!(exec.is_terminal());
    assert!(exec.end_time.is_some());
    assert!(exec.current_task.is_none());
    assert_eq!(exec.result.is_some(), exec.status == ExecutionStatus::Completed);
    assert_eq!(exec.error.is_some(), exec.status == ExecutionStatus::Failed);
    assert!((0.0..=1.0).contains(&exec.progress));
}

fn request(pattern: Pattern, options: serde_json::Value) -> TaskRequest {
    TaskRequest::new(pattern, "Assess ACME Corp", "session-1").with_options(options)
}

fn roles_of(exec: &Execution) -> Vec<&str> {
    exec.agent_outputs.iter().map(|a| a.agent.as_str()).collect()
}

fn echo(request: &InvocationRequest) -> MaestroResult<String> {
    Ok(format!("{} output", request.role))
}

// --- sequential ---

#[tokio::test]
async fn sequential_runs_roles_in_order_and_returns_last_output() {
    let invoker = Arc::new(ScriptedInvoker::new(echo));
    let orch = orchestrator(invoker.clone());

    let exec = run(&orch, request(Pattern::Sequential, json!({"roles": ["a", "b", "c"]}))).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(roles_of(&exec), vec!["a", "b", "c"]);
    assert_eq!(exec.result.as_ref().unwrap().output, "c output");
    assert_eq!(exec.completed_tasks, vec!["a", "b", "c"]);
    assert_eq!(exec.progress, 1.0);

    // each step sees every earlier labeled output
    let c_input = &exec.agent_outputs[2].input;
    assert!(c_input.contains("### A\na output"));
    assert!(c_input.contains("### B\nb output"));
}

#[tokio::test]
async fn sequential_synthesize_adds_final_call() {
    let invoker = Arc::new(ScriptedInvoker::new(echo));
    let orch = orchestrator(invoker.clone());

    let exec = run(
        &orch,
        request(Pattern::Sequential, json!({"roles": ["a", "b"], "synthesize": true})),
    )
    .await;

    assert_eq!(roles_of(&exec), vec!["a", "b", "synthesizer"]);
    assert_eq!(exec.result.unwrap().output, "synthesizer output");
}

#[tokio::test]
async fn sequential_failure_keeps_earlier_activities() {
    let invoker = Arc::new(ScriptedInvoker::new(|req| match req.role.as_str() {
        "b" => Err(MaestroError::agent("b", "invalid input")),
        _ => echo(req),
    }));
    let orch = orchestrator(invoker.clone());

    let exec = run(&orch, request(Pattern::Sequential, json!({"roles": ["a", "b", "c"]}))).await;

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(roles_of(&exec), vec!["a"]);
    assert_eq!(exec.failed_tasks, vec!["b"]);
    assert_eq!(exec.error.unwrap().category, ErrorCategory::AgentInvocation);
    assert_eq!(invoker.calls_for("c"), 0);
    assert_eq!(invoker.calls_for("b"), 1);
}

#[tokio::test]
async fn transient_failures_are_retried_before_failing() {
    let attempts = Arc::new(Mutex::new(0u32));
    let counter = attempts.clone();
    let invoker = Arc::new(ScriptedInvoker::new(move |req| {
        if req.role == "b" {
            let mut n = counter.lock();
            *n += 1;
            if *n < 3 {
                return Err(MaestroError::Http("503 Service Unavailable".into()));
            }
        }
        echo(req)
    }));
    let orch = orchestrator(invoker.clone());

    let exec = run(&orch, request(Pattern::Sequential, json!({"roles": ["a", "b"]}))).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(invoker.calls_for("b"), 3);
    let metrics = orch.monitor().get("b").await.unwrap().metrics;
    assert_eq!(metrics.calls, 1);
    assert_eq!(metrics.retries, 2);
}

#[tokio::test]
async fn retryable_roles_retry_non_transient_errors() {
    let attempts = Arc::new(Mutex::new(0u32));
    let counter = attempts.clone();
    let invoker = Arc::new(ScriptedInvoker::new(move |req| {
        if req.role == "a" {
            let mut n = counter.lock();
            *n += 1;
            if *n == 1 {
                return Err(MaestroError::agent("a", "malformed answer"));
            }
        }
        echo(req)
    }));
    let orch = orchestrator(invoker.clone());

    let exec = run(
        &orch,
        request(Pattern::Sequential, json!({"roles": ["a"], "retryableRoles": ["a"]})),
    )
    .await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(invoker.calls_for("a"), 2);
}

#[tokio::test]
async fn slow_call_times_out_and_fails_with_timeout_category() {
    struct Sleepy;

    #[async_trait]
    impl AgentInvoker for Sleepy {
        async fn invoke(&self, _request: &InvocationRequest) -> MaestroResult<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    let config = OrchestratorConfig {
        call_timeout_ms: 20,
        retry: RetryPolicy {
            max_retries: 1,
            backoff_base_ms: 1,
            backoff_max_ms: 1,
        },
        ..Default::default()
    };
    let orch = Orchestrator::new(Arc::new(Sleepy), config);
    let id = orch
        .start(request(Pattern::Sequential, json!({"roles": ["a"]})))
        .unwrap();
    let exec = orch.wait_for_terminal(id).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.error.unwrap().category, ErrorCategory::Timeout);
    assert_eq!(exec.failed_tasks, vec!["a"]);
}

// --- concurrent ---

#[tokio::test]
async fn concurrent_partial_failure_still_completes() {
    let invoker = Arc::new(ScriptedInvoker::new(|req| match req.role.as_str() {
        "y" => Err(MaestroError::agent("y", "invalid input")),
        _ => echo(req),
    }));
    let orch = orchestrator(invoker.clone());

    let exec = run(
        &orch,
        request(
            Pattern::Concurrent,
            json!({"roles": ["x", "y", "z"], "aggregationStrategy": "concatenate"}),
        ),
    )
    .await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    let mut roles = roles_of(&exec);
    roles.sort();
    assert_eq!(roles, vec!["x", "z"]);
    assert_eq!(exec.failed_tasks, vec!["y"]);
    let result = exec.result.unwrap();
    assert!(result.output.contains("### X\nx output"));
    assert!(result.output.contains("### Z\nz output"));
    assert!(result.notes.iter().any(|n| n.contains("'y'")));
}

#[tokio::test]
async fn concurrent_merge_calls_reducer_after_join() {
    let invoker = Arc::new(ScriptedInvoker::new(echo));
    let orch = orchestrator(invoker.clone());

    let exec = run(&orch, request(Pattern::Concurrent, json!({"roles": ["x", "y", "z"]}))).await;

    assert_eq!(exec.agent_outputs.len(), 4);
    assert_eq!(exec.agent_outputs[3].agent, "synthesizer");
    let reducer_input = &exec.agent_outputs[3].input;
    for section in ["### X", "### Y", "### Z"] {
        assert!(reducer_input.contains(section));
    }
    assert_eq!(exec.result.unwrap().output, "synthesizer output");
    // members all saw the same base context
    assert!(exec.agent_outputs[..3]
        .iter()
        .all(|a| a.input == exec.agent_outputs[0].input));
}

#[tokio::test]
async fn concurrent_all_or_nothing_fails_on_first_failure() {
    let invoker = Arc::new(ScriptedInvoker::new(|req| match req.role.as_str() {
        "y" => Err(MaestroError::agent("y", "invalid input")),
        _ => echo(req),
    }));
    let orch = orchestrator(invoker.clone());

    let exec = run(
        &orch,
        request(
            Pattern::Concurrent,
            json!({"roles": ["x", "y", "z"], "allOrNothing": true}),
        ),
    )
    .await;

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.failed_tasks.contains(&"y".to_string()));
    assert_eq!(invoker.calls_for("synthesizer"), 0);
}

#[tokio::test]
async fn concurrent_all_members_failing_fails() {
    let invoker = Arc::new(ScriptedInvoker::new(|req| {
        Err(MaestroError::agent(req.role.clone(), "invalid input"))
    }));
    let orch = orchestrator(invoker.clone());

    let exec = run(&orch, request(Pattern::Concurrent, json!({"roles": ["x", "y"]}))).await;

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.failed_tasks.len(), 2);
    assert!(exec.agent_outputs.is_empty());
}

// --- handoff ---

#[tokio::test]
async fn handoff_stops_at_ceiling_with_budget_note() {
    let invoker = Arc::new(ScriptedInvoker::new(|req| {
        Ok(format!("{} needs help\nHANDOFF: researcher | more digging", req.role))
    }));
    let orch = orchestrator(invoker.clone());

    let exec = run(&orch, request(Pattern::Handoff, json!({"maxHandoffs": 2}))).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(invoker.calls().len(), 3);
    assert_eq!(roles_of(&exec), vec!["triage", "researcher", "researcher"]);
    let result = exec.result.unwrap();
    assert_eq!(result.output, "researcher needs help");
    assert!(result.notes.iter().any(|n| n.contains("maxHandoffs=2")));
}

#[tokio::test]
async fn handoff_follows_directives_until_none() {
    let invoker = Arc::new(ScriptedInvoker::new(|req| match req.role.as_str() {
        "triage" => Ok("Needs data.\nHANDOFF: analyst | ratios".into()),
        "analyst" => Ok("Margins are 12%.\nHANDOFF: writer".into()),
        "writer" => Ok("Final memo".into()),
        other => Ok(format!("{other} output")),
    }));
    let orch = orchestrator(invoker.clone());

    let exec = run(&orch, request(Pattern::Handoff, json!({}))).await;

    assert_eq!(roles_of(&exec), vec!["triage", "analyst", "writer"]);
    let result = exec.result.unwrap();
    assert_eq!(result.output, "Final memo");
    assert!(result.notes.is_empty());
    // the target sees accumulated context
    assert!(exec.agent_outputs[2].input.contains("Margins are 12%"));
}

#[tokio::test]
async fn handoff_to_unknown_agent_terminates_with_note() {
    let invoker = Arc::new(ScriptedInvoker::new(|_| Ok("HANDOFF: lawyer".into())));
    let orch = orchestrator(invoker.clone());

    let exec = run(&orch, request(Pattern::Handoff, json!({}))).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(invoker.calls().len(), 1);
    assert!(exec.result.unwrap().notes[0].contains("lawyer"));
}

// --- group chat ---

#[tokio::test]
async fn group_chat_without_consensus_is_inconclusive_after_max_turns() {
    let invoker = Arc::new(ScriptedInvoker::new(|req| match req.role.as_str() {
        "moderator" => Ok("NEXT: skeptic".into()),
        other => Ok(format!("{other}: I remain unconvinced.")),
    }));
    let orch = orchestrator(invoker.clone());

    let exec = run(&orch, request(Pattern::GroupChat, json!({"maxTurns": 5}))).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.completed_tasks.len(), 5);
    assert_eq!(invoker.calls_for("skeptic"), 5);
    let result = exec.result.unwrap();
    assert!(result.inconclusive);
    assert!(result.notes[0].contains("maxTurns=5"));
}

#[tokio::test]
async fn group_chat_invalid_pick_falls_back_to_round_robin() {
    let invoker = Arc::new(ScriptedInvoker::new(|req| match req.role.as_str() {
        "moderator" => Ok("NEXT: nobody".into()),
        other => Ok(format!("{other} speaks")),
    }));
    let orch = orchestrator(invoker.clone());

    let exec = run(
        &orch,
        request(Pattern::GroupChat, json!({"maxTurns": 3, "requireConsensus": false})),
    )
    .await;

    assert_eq!(
        exec.completed_tasks,
        vec!["turn 1: optimist", "turn 2: skeptic", "turn 3: analyst"]
    );
    assert!(!exec.result.unwrap().inconclusive);
}

#[tokio::test]
async fn group_chat_stops_on_consensus() {
    let invoker = Arc::new(ScriptedInvoker::new(|req| match req.role.as_str() {
        "moderator" => Ok("NEXT: analyst".into()),
        "analyst" => Ok("CONSENSUS: hold the position".into()),
        other => Ok(format!("{other} speaks")),
    }));
    let orch = orchestrator(invoker.clone());

    let exec = run(&orch, request(Pattern::GroupChat, json!({}))).await;

    let result = exec.result.unwrap();
    assert_eq!(result.output, "hold the position");
    assert!(!result.inconclusive);
    assert_eq!(exec.completed_tasks, vec!["turn 1: analyst"]);
}

// --- magentic ---

fn magentic_script(verdict: &'static str) -> impl Fn(&InvocationRequest) -> MaestroResult<String> {
    move |req| match req.role.as_str() {
        "planner" => Ok("1. [researcher] Gather the filings\n2. Compute the ratios\n3. Draft the memo".into()),
        "validator" => Ok(verdict.into()),
        other => Ok(format!("{other} output")),
    }
}

#[tokio::test]
async fn magentic_dispatches_subtasks_and_synthesizes() {
    let invoker = Arc::new(ScriptedInvoker::new(magentic_script("ACCEPT")));
    let orch = orchestrator(invoker.clone());

    let exec = run(&orch, request(Pattern::Magentic, json!({}))).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(
        exec.completed_tasks,
        vec![
            "plan",
            "Gather the filings",
            "Compute the ratios",
            "Draft the memo",
            "synthesize"
        ]
    );
    assert_eq!(invoker.calls_for("researcher"), 1);
    assert_eq!(invoker.calls_for("analyst"), 1);
    assert_eq!(invoker.calls_for("writer"), 1);
    assert_eq!(invoker.calls_for("validator"), 3);
    assert_eq!(exec.result.unwrap().output, "manager output");
}

#[tokio::test]
async fn magentic_rejected_twice_fails_subtasks() {
    let invoker = Arc::new(ScriptedInvoker::new(magentic_script("REJECT: too thin")));
    let orch = orchestrator(invoker.clone());

    let exec = run(&orch, request(Pattern::Magentic, json!({}))).await;

    // every sub-task was re-opened once, then failed, so nothing completed
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(invoker.calls_for("researcher"), 2);
    assert_eq!(exec.failed_tasks.len(), 3);
    assert_eq!(invoker.calls_for("manager"), 0);
}

#[tokio::test]
async fn magentic_step_budget_lists_unresolved() {
    let invoker = Arc::new(ScriptedInvoker::new(magentic_script("ACCEPT")));
    let orch = orchestrator(invoker.clone());

    let exec = run(&orch, request(Pattern::Magentic, json!({"maxSteps": 1}))).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    let result = exec.result.unwrap();
    let note = result.notes.iter().find(|n| n.contains("maxSteps=1")).unwrap();
    assert!(note.contains("Compute the ratios; Draft the memo"));
}

// --- deep research ---

#[tokio::test]
async fn deep_research_full_runs_every_stage_in_order() {
    let invoker = Arc::new(ScriptedInvoker::new(|req| match req.role.as_str() {
        "reviewer" => Ok("APPROVED".into()),
        _ => echo(req),
    }));
    let orch = orchestrator(invoker.clone());

    let exec = run(&orch, request(Pattern::DeepResearch, json!({"mode": "full"}))).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    let roles = roles_of(&exec);
    assert_eq!(&roles[..2], &["planner", "researcher"]);
    let mut searches: Vec<&str> = roles[2..5].to_vec();
    searches.sort();
    assert_eq!(searches, vec!["searcher:filings", "searcher:news", "searcher:web"]);
    assert_eq!(&roles[5..], &["writer", "analyst", "reviewer", "summarizer"]);

    let output = exec.result.unwrap().output;
    assert!(output.starts_with("## Executive Summary"));
    assert!(output.contains("## Analysis"));
}

#[tokio::test]
async fn deep_research_reviewer_loop_is_bounded() {
    let invoker = Arc::new(ScriptedInvoker::new(|req| match req.role.as_str() {
        "reviewer" => Ok("Needs more sources.".into()),
        _ => echo(req),
    }));
    let orch = orchestrator(invoker.clone());

    let exec = run(
        &orch,
        request(Pattern::DeepResearch, json!({"mode": "reviewer", "maxRevisions": 2})),
    )
    .await;

    assert_eq!(invoker.calls_for("reviewer"), 2);
    assert_eq!(invoker.calls_for("writer"), 3);
    assert!(exec.result.unwrap().notes.iter().any(|n| n.contains("maxRevisions=2")));
}

#[tokio::test]
async fn deep_research_tolerates_failed_sources() {
    let invoker = Arc::new(ScriptedInvoker::new(|req| match req.role.as_str() {
        "searcher:news" => Err(MaestroError::agent("searcher:news", "invalid query")),
        _ => echo(req),
    }));
    let orch = orchestrator(invoker.clone());

    let exec = run(&orch, request(Pattern::DeepResearch, json!({}))).await;

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.failed_tasks, vec!["search:news"]);
    assert_eq!(invoker.calls_for("analyst"), 0);
    assert_eq!(invoker.calls_for("reviewer"), 0);
}

#[tokio::test]
async fn deep_research_all_sources_failing_fails() {
    let invoker = Arc::new(ScriptedInvoker::new(|req| {
        if req.role.starts_with("searcher:") {
            return Err(MaestroError::agent(req.role.clone(), "invalid query"));
        }
        echo(req)
    }));
    let orch = orchestrator(invoker.clone());

    let exec = run(&orch, request(Pattern::DeepResearch, json!({}))).await;

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.failed_tasks.len(), 3);
    assert_eq!(invoker.calls_for("writer"), 0);
}

// --- lifecycle ---

#[tokio::test]
async fn progress_is_monotonic_for_every_pattern() {
    let invoker = Arc::new(ScriptedInvoker::new(|req| match req.role.as_str() {
        "moderator" => Ok("NEXT: optimist".into()),
        "planner" => Ok("1. Gather\n2. Compute".into()),
        "validator" => Ok("ACCEPT".into()),
        "reviewer" => Ok("APPROVED".into()),
        _ => echo(req),
    }));
    let orch = orchestrator(invoker);

    for pattern in Pattern::ALL {
        let mut updates = orch.subscribe(None);
        let id = orch.start(request(pattern, json!({}))).unwrap();
        let mut seen = Vec::new();
        while let Some(event) = updates.next().await {
            let Some(snapshot) = event.snapshot() else {
                continue;
            };
            if snapshot.execution_id != id {
                continue;
            }
            seen.push(snapshot.progress);
            if snapshot.is_terminal() {
                assert_eq!(snapshot.status, ExecutionStatus::Completed, "{pattern}");
                break;
            }
        }
        assert!(
            seen.windows(2).all(|w| w[0] <= w[1]),
            "{pattern} progress went backwards: {seen:?}"
        );
        assert_eq!(seen.last().copied(), Some(1.0));
    }
}

#[tokio::test]
async fn cancelling_running_execution_keeps_prefix_history() {
    let gate = Arc::new(Notify::new());
    let invoker = Arc::new(ScriptedInvoker::new(echo).gated("b", gate.clone()));
    let orch = orchestrator(invoker.clone());

    let id = orch
        .start(request(Pattern::Sequential, json!({"roles": ["a", "b", "c"]})))
        .unwrap();

    // wait until "b" is in flight
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if orch.status(id).unwrap().current_task.as_deref() == Some("b") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let snapshot = orch.cancel(id).unwrap();
    assert!(!snapshot.is_terminal());
    gate.notify_one();

    let exec = orch.wait_for_terminal(id).await.unwrap();
    assert_terminal_invariants(&exec);
    assert_eq!(exec.status, ExecutionStatus::Cancelled);
    // the in-flight call finished; nothing after it ran
    assert_eq!(roles_of(&exec), vec!["a", "b"]);
    assert_eq!(invoker.calls_for("c"), 0);

    // idempotent once terminal
    assert_eq!(orch.cancel(id).unwrap().status, ExecutionStatus::Cancelled);
}

async fn wait_until(what: &str, mut ready: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn wait_for_terminal_survives_status_lag_from_other_executions() {
    let gate = Arc::new(Notify::new());
    let invoker = Arc::new(ScriptedInvoker::new(echo).gated("a", gate.clone()));
    let orch = Orchestrator::new(
        invoker,
        OrchestratorConfig {
            status_buffer: 2,
            ..test_config()
        },
    );

    let first = orch
        .start(request(Pattern::Sequential, json!({"roles": ["a"]})))
        .unwrap();
    wait_until("a in flight", || {
        orch.status(first).unwrap().current_task.as_deref() == Some("a")
    })
    .await;

    // subscribe while the first execution is still running, then stop polling
    let waiter = orch.wait_for_terminal(first);
    tokio::pin!(waiter);
    assert!(tokio::time::timeout(Duration::from_millis(10), &mut waiter)
        .await
        .is_err());

    gate.notify_one();
    wait_until("first execution to finish", || orch.status(first).unwrap().is_terminal()).await;
    // enough traffic to push the terminal snapshot out of the buffer
    let second = run(&orch, request(Pattern::Sequential, json!({"roles": ["x", "y", "z"]}))).await;
    assert_eq!(second.status, ExecutionStatus::Completed);

    let done = tokio::time::timeout(Duration::from_secs(2), &mut waiter)
        .await
        .expect("waiter missed the terminal state")
        .unwrap();
    assert_eq!(done.execution_id, first);
    assert_eq!(done.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn cancel_during_retry_backoff_ends_cancelled() {
    let invoker = Arc::new(ScriptedInvoker::new(|req| match req.role.as_str() {
        "a" => Err(MaestroError::Http("503 Service Unavailable".into())),
        _ => echo(req),
    }));
    let orch = Orchestrator::new(
        invoker.clone(),
        OrchestratorConfig {
            retry: RetryPolicy {
                max_retries: 3,
                backoff_base_ms: 60_000,
                backoff_max_ms: 60_000,
            },
            ..test_config()
        },
    );

    let id = orch
        .start(request(Pattern::Sequential, json!({"roles": ["a", "b"]})))
        .unwrap();
    wait_until("first attempt", || invoker.calls_for("a") == 1).await;
    orch.cancel(id).unwrap();

    let exec = tokio::time::timeout(Duration::from_secs(5), orch.wait_for_terminal(id))
        .await
        .expect("cancellation waited out the backoff")
        .unwrap();
    assert_terminal_invariants(&exec);
    assert_eq!(exec.status, ExecutionStatus::Cancelled);
    assert_eq!(invoker.calls_for("a"), 1);
    assert_eq!(invoker.calls_for("b"), 0);
}

#[tokio::test]
async fn in_flight_failure_after_cancel_ends_cancelled() {
    let gate = Arc::new(Notify::new());
    let invoker = Arc::new(
        ScriptedInvoker::new(|req| match req.role.as_str() {
            "b" => Err(MaestroError::agent("b", "400 refused")),
            _ => echo(req),
        })
        .gated("b", gate.clone()),
    );
    let orch = orchestrator(invoker.clone());

    let id = orch
        .start(request(Pattern::Sequential, json!({"roles": ["a", "b", "c"]})))
        .unwrap();
    wait_until("b in flight", || {
        orch.status(id).unwrap().current_task.as_deref() == Some("b")
    })
    .await;

    orch.cancel(id).unwrap();
    gate.notify_one();

    let exec = orch.wait_for_terminal(id).await.unwrap();
    assert_terminal_invariants(&exec);
    assert_eq!(exec.status, ExecutionStatus::Cancelled);
    assert!(exec.error.is_none());
    assert_eq!(roles_of(&exec), vec!["a"]);
    assert_eq!(invoker.calls_for("b"), 1);
    assert_eq!(invoker.calls_for("c"), 0);
}

#[tokio::test]
async fn cancelling_queued_execution_runs_nothing() {
    let invoker = Arc::new(ScriptedInvoker::new(echo));
    let orch = orchestrator(invoker.clone());

    let id = orch.start(request(Pattern::Concurrent, json!({}))).unwrap();
    let snapshot = orch.cancel(id).unwrap();
    assert_eq!(snapshot.status, ExecutionStatus::Queued);

    let exec = orch.wait_for_terminal(id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Cancelled);
    assert!(exec.agent_outputs.is_empty());
    assert!(invoker.calls().is_empty());
}

#[tokio::test]
async fn unknown_execution_is_not_found() {
    let orch = orchestrator(Arc::new(ScriptedInvoker::new(echo)));
    let err = orch.status(Uuid::new_v4()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NotFound);
}

#[tokio::test]
async fn list_filters_history() {
    let orch = orchestrator(Arc::new(ScriptedInvoker::new(echo)));
    run(&orch, request(Pattern::Sequential, json!({"roles": ["a"]}))).await;
    run(&orch, request(Pattern::Concurrent, json!({"roles": ["x"]}))).await;
    let other = TaskRequest::new(Pattern::Sequential, "Other", "session-2")
        .with_options(json!({"roles": ["a"]}));
    run(&orch, other).await;

    let sequential = orch.list(&ExecutionFilter {
        pattern: Some(Pattern::Sequential),
        ..Default::default()
    });
    assert_eq!(sequential.len(), 2);

    let session_two = orch.list(&ExecutionFilter {
        session_id: Some("session-2".into()),
        ..Default::default()
    });
    assert_eq!(session_two.len(), 1);
    assert_eq!(session_two[0].task, "Other");

    let completed = orch.list(&ExecutionFilter {
        status: Some(ExecutionStatus::Completed),
        ..Default::default()
    });
    assert_eq!(completed.len(), 3);
}
