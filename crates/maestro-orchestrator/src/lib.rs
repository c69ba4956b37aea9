//! Multi-pattern agent execution for Maestro.
//!
//! A task is run under one of six patterns (sequential, concurrent, handoff,
//! group chat, magentic, deep research). Each run is an [`Execution`] record
//! with one writer, observable by polling the store or by subscribing to
//! pushed snapshots, and cancellable between agent calls.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Starts, cancels, lists and watches executions.
//! - [`ExecutionStore`] — Keyed record storage with copy-on-read access.
//! - [`StatusChannel`] — Best-effort push of execution snapshots.
//! - [`PatternStrategy`] — The control flow of one pattern.
//! - [`ExecutionContext`] — The single writer handed to a running strategy.
//! - [`AgentMonitor`] — Per-role call metrics.

/// Group chat consensus detection.
pub mod consensus;
/// The per-execution writer and call handle.
pub mod context;
/// Orchestrator façade and configuration.
pub mod engine;
/// Magentic sub-task ledger.
pub mod ledger;
/// Per-role call metrics.
pub mod monitor;
/// Typed per-pattern options.
pub mod options;
/// Role profiles and default rosters.
pub mod profiles;
/// Status push channel.
pub mod status;
/// Execution record storage and retention.
pub mod store;
/// Pattern strategies.
pub mod strategies;
/// Execution data model.
pub mod types;

pub use consensus::{ConsensusPolicy, MarkerConsensus};
pub use context::{AgentCaller, ExecutionContext};
pub use engine::{Orchestrator, OrchestratorConfig};
pub use ledger::{SubTask, SubTaskLedger, SubTaskStatus};
pub use monitor::{AgentMonitor, RoleMetrics, RoleState};
pub use options::{AggregationStrategy, PatternOptions, ResearchMode};
pub use profiles::{AgentProfile, PatternInfo, ProfileRegistry};
pub use status::{StatusChannel, StatusEvent, StatusSubscription};
pub use store::{ExecutionStore, InMemoryExecutionStore, RetentionPolicy};
pub use strategies::{strategy_for, PatternStrategy};
pub use types::{
    AgentActivity, Execution, ExecutionError, ExecutionFilter, ExecutionResult, ExecutionStatus,
    Pattern, TaskRequest,
};
