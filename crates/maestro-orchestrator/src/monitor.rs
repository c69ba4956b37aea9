use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Call metrics for one role, accumulated across executions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMetrics {
    /// Logical calls (a retried call counts once).
    pub calls: u64,
    /// Calls that failed after retries.
    pub failures: u64,
    /// Extra attempts spent on retries.
    pub retries: u64,
    /// Wall-clock time spent in calls, including retries.
    pub duration_ms: u64,
}

/// Snapshot entry for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleState {
    /// Role name.
    pub role: String,
    /// Calls currently in flight.
    pub in_flight: u32,
    /// Accumulated metrics.
    pub metrics: RoleMetrics,
}

/// Tracks per-role agent call metrics for every execution in the process.
pub struct AgentMonitor {
    states: Arc<RwLock<HashMap<String, RoleState>>>,
}

impl AgentMonitor {
    /// An empty monitor. Roles appear on first use.
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Mark a call for `role` as started.
    pub async fn start_call(&self, role: &str) {
        let mut states = self.states.write().await;
        entry(&mut states, role).in_flight += 1;
    }

    /// Record the end of a call that took `attempts` tries.
    pub async fn finish_call(&self, role: &str, attempts: u32, duration_ms: u64, succeeded: bool) {
        let mut states = self.states.write().await;
        let state = entry(&mut states, role);
        state.in_flight = state.in_flight.saturating_sub(1);
        state.metrics.calls += 1;
        state.metrics.retries += u64::from(attempts.saturating_sub(1));
        state.metrics.duration_ms += duration_ms;
        if !succeeded {
            state.metrics.failures += 1;
        }
    }

    /// All roles, sorted by name.
    pub async fn snapshot(&self) -> Vec<RoleState> {
        let states = self.states.read().await;
        let mut all: Vec<RoleState> = states.values().cloned().collect();
        all.sort_by(|a, b| a.role.cmp(&b.role));
        all
    }

    /// State of one role.
    pub async fn get(&self, role: &str) -> Option<RoleState> {
        let states = self.states.read().await;
        states.get(role).cloned()
    }

    /// Totals across all roles.
    pub async fn aggregate(&self) -> RoleMetrics {
        let states = self.states.read().await;
        let mut total = RoleMetrics::default();
        for state in states.values() {
            total.calls += state.metrics.calls;
            total.failures += state.metrics.failures;
            total.retries += state.metrics.retries;
            total.duration_ms += state.metrics.duration_ms;
        }
        total
    }

    /// Serialize the current state as JSON (for the metrics endpoint).
    pub async fn to_json(&self) -> serde_json::Value {
        let roles = self.snapshot().await;
        let aggregate = self.aggregate().await;
        serde_json::json!({
            "roles": roles,
            "aggregate": aggregate,
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn entry<'a>(states: &'a mut HashMap<String, RoleState>, role: &str) -> &'a mut RoleState {
    states.entry(role.to_string()).or_insert_with(|| RoleState {
        role: role.to_string(),
        in_flight: 0,
        metrics: RoleMetrics::default(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initially_empty() {
        let monitor = AgentMonitor::new();
        assert!(monitor.snapshot().await.is_empty());
        assert!(monitor.get("writer").await.is_none());
    }

    #[tokio::test]
    async fn test_start_and_finish_call() {
        let monitor = AgentMonitor::new();
        monitor.start_call("writer").await;
        assert_eq!(monitor.get("writer").await.unwrap().in_flight, 1);

        monitor.finish_call("writer", 3, 1200, true).await;
        let state = monitor.get("writer").await.unwrap();
        assert_eq!(state.in_flight, 0);
        assert_eq!(state.metrics.calls, 1);
        assert_eq!(state.metrics.retries, 2);
        assert_eq!(state.metrics.failures, 0);
        assert_eq!(state.metrics.duration_ms, 1200);
    }

    #[tokio::test]
    async fn test_failure_counted() {
        let monitor = AgentMonitor::new();
        monitor.start_call("researcher").await;
        monitor.finish_call("researcher", 1, 10, false).await;
        let state = monitor.get("researcher").await.unwrap();
        assert_eq!(state.metrics.failures, 1);
    }

    #[tokio::test]
    async fn test_aggregate_and_json() {
        let monitor = AgentMonitor::new();
        monitor.finish_call("planner", 1, 100, true).await;
        monitor.finish_call("writer", 2, 300, false).await;

        let agg = monitor.aggregate().await;
        assert_eq!(agg.calls, 2);
        assert_eq!(agg.retries, 1);
        assert_eq!(agg.failures, 1);
        assert_eq!(agg.duration_ms, 400);

        let json = monitor.to_json().await;
        assert_eq!(json["roles"].as_array().unwrap().len(), 2);
        assert_eq!(json["roles"][0]["role"], "planner");
        assert_eq!(json["aggregate"]["calls"], 2);
    }
}
