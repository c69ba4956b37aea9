use serde::{Deserialize, Serialize};

/// State of a magentic sub-task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubTaskStatus {
    /// Waiting to be dispatched (new or re-opened).
    Open,
    /// Dispatched to a worker.
    Running,
    /// Output accepted.
    Completed,
    /// Permanently failed.
    Failed {
        /// Why it failed.
        reason: String,
    },
}

/// One tracked unit of a decomposed goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTask {
    /// Position in the plan.
    pub index: usize,
    /// What needs doing.
    pub description: String,
    /// Role requested by the planner, if any.
    pub role: Option<String>,
    /// Current state.
    pub status: SubTaskStatus,
    /// Times the validator re-opened it.
    pub reopened: u32,
    /// Accepted output.
    pub output: Option<String>,
}

impl SubTask {
    /// Completed or permanently failed.
    pub fn is_resolved(&self) -> bool {
        matches!(self.status, SubTaskStatus::Completed | SubTaskStatus::Failed { .. })
    }
}

/// Ordered sub-task ledger driven by the magentic loop.
///
/// Sub-tasks are dispatched in plan order. A sub-task may be re-opened at
/// most [`MAX_REOPENS`](Self::MAX_REOPENS) times.
#[derive(Debug, Default)]
pub struct SubTaskLedger {
    tasks: Vec<SubTask>,
}

impl SubTaskLedger {
    /// Re-open bound per sub-task.
    pub const MAX_REOPENS: u32 = 1;

    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sub-task; returns its index.
    pub fn add(&mut self, description: impl Into<String>, role: Option<String>) -> usize {
        let index = self.tasks.len();
        self.tasks.push(SubTask {
            index,
            description: description.into(),
            role,
            status: SubTaskStatus::Open,
            reopened: 0,
            output: None,
        });
        index
    }

    /// First open sub-task in plan order.
    pub fn next_open(&self) -> Option<&SubTask> {
        self.tasks.iter().find(|t| t.status == SubTaskStatus::Open)
    }

    /// Sub-task by index.
    pub fn get(&self, index: usize) -> Option<&SubTask> {
        self.tasks.get(index)
    }

    /// Mark a sub-task as dispatched.
    pub fn mark_running(&mut self, index: usize) -> bool {
        self.set_status(index, SubTaskStatus::Running)
    }

    /// Accept a sub-task's output.
    pub fn mark_completed(&mut self, index: usize, output: String) -> bool {
        match self.tasks.get_mut(index) {
            Some(task) => {
                task.status = SubTaskStatus::Completed;
                task.output = Some(output);
                true
            }
            None => false,
        }
    }

    /// Fail a sub-task permanently.
    pub fn mark_failed(&mut self, index: usize, reason: impl Into<String>) -> bool {
        self.set_status(
            index,
            SubTaskStatus::Failed {
                reason: reason.into(),
            },
        )
    }

    /// Re-open a sub-task for another attempt. Returns `false` once the
    /// re-open bound is used up; the caller then fails it.
    pub fn reopen(&mut self, index: usize) -> bool {
        match self.tasks.get_mut(index) {
            Some(task) if task.reopened < Self::MAX_REOPENS && !task.is_resolved() => {
                task.reopened += 1;
                task.status = SubTaskStatus::Open;
                true
            }
            _ => false,
        }
    }

    /// All sub-tasks in plan order.
    pub fn all(&self) -> &[SubTask] {
        &self.tasks
    }

    /// Completed sub-tasks in plan order.
    pub fn completed(&self) -> impl Iterator<Item = &SubTask> {
        self.tasks
            .iter()
            .filter(|t| t.status == SubTaskStatus::Completed)
    }

    /// Descriptions of sub-tasks not yet resolved.
    pub fn unresolved(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| !t.is_resolved())
            .map(|t| t.description.as_str())
            .collect()
    }

    /// Number of completed sub-tasks.
    pub fn completed_count(&self) -> usize {
        self.completed().count()
    }

    /// Number of resolved sub-tasks.
    pub fn resolved_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_resolved()).count()
    }

    /// Total number of sub-tasks.
    pub fn total_count(&self) -> usize {
        self.tasks.len()
    }

    /// Whether every sub-task is resolved.
    pub fn is_done(&self) -> bool {
        self.tasks.iter().all(SubTask::is_resolved)
    }

    fn set_status(&mut self, index: usize, status: SubTaskStatus) -> bool {
        match self.tasks.get_mut(index) {
            Some(task) => {
                task.status = status;
                true
            }
            None => false,
        }
    }
}
