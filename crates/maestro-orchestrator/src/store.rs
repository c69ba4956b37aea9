use crate::types::{Execution, ExecutionFilter, TaskRequest};
use chrono::{DateTime, Duration, Utc};
use maestro_core::{MaestroError, MaestroResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// When terminal executions may be evicted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Terminal executions older than this (by `end_time`) are evicted.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// At most this many terminal executions are kept; the oldest go first.
    #[serde(default = "default_max_terminal")]
    pub max_terminal: usize,
    /// How often the server sweeps, in seconds. `0` disables the sweeper.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_max_age_secs() -> u64 {
    86_400
}

fn default_max_terminal() -> usize {
    1_000
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            max_terminal: default_max_terminal(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Keyed storage for execution records.
///
/// Readers always get clones; no lock is held while a caller serializes a
/// snapshot. Records are only removed through [`remove`](Self::remove) or
/// [`evict`](Self::evict), and `evict` never touches a non-terminal record.
pub trait ExecutionStore: Send + Sync {
    /// Store a new record. Fails if the id is taken.
    fn insert(&self, execution: Execution) -> MaestroResult<()>;

    /// Snapshot of one record.
    fn get(&self, id: Uuid) -> MaestroResult<Execution>;

    /// Apply `delta` under the write lock and return the post-mutation
    /// snapshot. If `delta` returns an error the record is left as the
    /// delta left it; deltas check before they write.
    fn mutate(
        &self,
        id: Uuid,
        delta: &mut dyn FnMut(&mut Execution) -> MaestroResult<()>,
    ) -> MaestroResult<Execution>;

    /// Records matching `filter`, oldest first.
    fn list(&self, filter: &ExecutionFilter) -> Vec<Execution>;

    /// Drop a record regardless of state.
    fn remove(&self, id: Uuid) -> MaestroResult<Execution>;

    /// Drop terminal records per `policy`; returns the evicted ids.
    fn evict(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Vec<Uuid>;

    /// Create a `queued` record for `request` under a fresh id.
    fn create(&self, request: &TaskRequest) -> MaestroResult<Execution> {
        let execution = Execution::queued(Uuid::new_v4(), request);
        self.insert(execution.clone())?;
        Ok(execution)
    }
}

/// [`ExecutionStore`] over an in-process map.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<Uuid, Execution>>,
}

impl InMemoryExecutionStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.executions.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.executions.read().is_empty()
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    fn insert(&self, execution: Execution) -> MaestroResult<()> {
        let mut executions = self.executions.write();
        if executions.contains_key(&execution.execution_id) {
            return Err(MaestroError::Orchestrator(format!(
                "execution {} already exists",
                execution.execution_id
            )));
        }
        executions.insert(execution.execution_id, execution);
        Ok(())
    }

    fn get(&self, id: Uuid) -> MaestroResult<Execution> {
        self.executions
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    fn mutate(
        &self,
        id: Uuid,
        delta: &mut dyn FnMut(&mut Execution) -> MaestroResult<()>,
    ) -> MaestroResult<Execution> {
        let mut executions = self.executions.write();
        let execution = executions.get_mut(&id).ok_or_else(|| not_found(id))?;
        delta(execution)?;
        Ok(execution.clone())
    }

    fn list(&self, filter: &ExecutionFilter) -> Vec<Execution> {
        let mut matched: Vec<Execution> = self
            .executions
            .read()
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by_key(|e| e.start_time);
        if let Some(limit) = filter.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }

    fn remove(&self, id: Uuid) -> MaestroResult<Execution> {
        self.executions
            .write()
            .remove(&id)
            .ok_or_else(|| not_found(id))
    }

    fn evict(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Vec<Uuid> {
        let max_age = Duration::seconds(i64::try_from(policy.max_age_secs).unwrap_or(i64::MAX));
        let mut executions = self.executions.write();

        let mut terminal: Vec<(DateTime<Utc>, Uuid)> = executions
            .values()
            .filter(|e| e.is_terminal())
            .map(|e| (e.end_time.unwrap_or(e.start_time), e.execution_id))
            .collect();
        terminal.sort();

        let mut evicted = Vec::new();
        let over_cap = terminal.len().saturating_sub(policy.max_terminal);
        for (i, (ended, id)) in terminal.into_iter().enumerate() {
            let expired = now.signed_duration_since(ended) > max_age;
            if i < over_cap || expired {
                executions.remove(&id);
                evicted.push(id);
            }
        }
        evicted
    }
}

fn not_found(id: Uuid) -> MaestroError {
    MaestroError::NotFound(format!("execution {id}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{ExecutionStatus, Pattern};
    use maestro_core::ErrorCategory;

    fn request(pattern: Pattern, session: &str) -> TaskRequest {
        TaskRequest::new(pattern, "Assess ACME", session)
    }

    fn finish(store: &InMemoryExecutionStore, id: Uuid, ended: DateTime<Utc>) {
        store
            .mutate(id, &mut |e| {
                e.status = ExecutionStatus::Completed;
                e.end_time = Some(ended);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_create_and_get() {
        let store = InMemoryExecutionStore::new();
        let created = store.create(&request(Pattern::Sequential, "s")).unwrap();
        let fetched = store.get(created.execution_id).unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.status, ExecutionStatus::Queued);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let store = InMemoryExecutionStore::new();
        let err = store.get(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
        let err = store.mutate(Uuid::new_v4(), &mut |_| Ok(())).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert!(store.remove(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let store = InMemoryExecutionStore::new();
        let exec = store.create(&request(Pattern::Handoff, "s")).unwrap();
        assert!(store.insert(exec).is_err());
    }

    #[test]
    fn test_mutate_returns_snapshot_and_propagates_error() {
        let store = InMemoryExecutionStore::new();
        let id = store.create(&request(Pattern::Handoff, "s")).unwrap().execution_id;

        let snapshot = store
            .mutate(id, &mut |e| {
                e.progress = 0.5;
                Ok(())
            })
            .unwrap();
        assert_eq!(snapshot.progress, 0.5);

        let err = store
            .mutate(id, &mut |_| Err(MaestroError::Orchestrator("rejected".into())))
            .unwrap_err();
        assert!(err.to_string().contains("rejected"));
        assert_eq!(store.get(id).unwrap().progress, 0.5);
    }

    #[test]
    fn test_list_filters_and_limit() {
        let store = InMemoryExecutionStore::new();
        store.create(&request(Pattern::Sequential, "a")).unwrap();
        store.create(&request(Pattern::Concurrent, "a")).unwrap();
        let last = store.create(&request(Pattern::Sequential, "b")).unwrap();

        assert_eq!(store.list(&ExecutionFilter::default()).len(), 3);

        let seq = store.list(&ExecutionFilter {
            pattern: Some(Pattern::Sequential),
            ..Default::default()
        });
        assert_eq!(seq.len(), 2);

        let session_a = store.list(&ExecutionFilter {
            session_id: Some("a".into()),
            ..Default::default()
        });
        assert_eq!(session_a.len(), 2);

        let newest = store.list(&ExecutionFilter {
            limit: Some(1),
            ..Default::default()
        });
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].start_time, last.start_time);
    }

    #[test]
    fn test_evict_by_age_only_touches_terminal() {
        let store = InMemoryExecutionStore::new();
        let now = Utc::now();
        let old = store.create(&request(Pattern::Sequential, "s")).unwrap().execution_id;
        let fresh = store.create(&request(Pattern::Sequential, "s")).unwrap().execution_id;
        let running = store.create(&request(Pattern::Sequential, "s")).unwrap().execution_id;
        finish(&store, old, now - Duration::hours(2));
        finish(&store, fresh, now);

        let policy = RetentionPolicy {
            max_age_secs: 3600,
            max_terminal: 100,
            sweep_interval_secs: 0,
        };
        let evicted = store.evict(&policy, now);
        assert_eq!(evicted, vec![old]);
        assert!(store.get(fresh).is_ok());
        assert!(store.get(running).is_ok());
    }

    #[test]
    fn test_evict_by_cap_drops_oldest_terminal_first() {
        let store = InMemoryExecutionStore::new();
        let now = Utc::now();
        let mut ids = Vec::new();
        for minutes in [30, 20, 10] {
            let id = store.create(&request(Pattern::Concurrent, "s")).unwrap().execution_id;
            finish(&store, id, now - Duration::minutes(minutes));
            ids.push(id);
        }
        let queued = store.create(&request(Pattern::Concurrent, "s")).unwrap().execution_id;

        let policy = RetentionPolicy {
            max_age_secs: 86_400,
            max_terminal: 1,
            sweep_interval_secs: 0,
        };
        let evicted = store.evict(&policy, now);
        assert_eq!(evicted, vec![ids[0], ids[1]]);
        assert!(store.get(ids[2]).is_ok());
        assert!(store.get(queued).is_ok());
    }
}
