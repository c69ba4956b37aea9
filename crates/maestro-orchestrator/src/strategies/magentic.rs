use super::PatternStrategy;
use crate::context::ExecutionContext;
use crate::ledger::{SubTask, SubTaskLedger, SubTaskStatus};
use crate::options::MagenticOptions;
use crate::profiles::{MANAGER, PLANNER, VALIDATOR};
use crate::types::{ExecutionResult, Pattern};
use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{info, warn};

const MAX_PLAN_ITEMS: usize = 50;

#[allow(clippy::expect_used)]
static PLAN_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:\d+[.)]|[-*•])[ \t]+(.+?)[ \t]*$").expect("valid plan item regex")
});

#[allow(clippy::expect_used)]
static ROLE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\*{0,2}\[([A-Za-z][\w-]*)\]\*{0,2}[ \t]*(.+)$").expect("valid role prefix regex")
});

#[allow(clippy::expect_used)]
static REJECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:\*\*)?(?:verdict[ \t]*:[ \t]*)?(?:reject(?:ed)?|invalid)\b")
        .expect("valid rejection regex")
});

/// Keyword hints used when the planner did not name a role.
const ROLE_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "researcher",
        &["research", "find", "gather", "collect", "search", "investigate", "look up", "identify"],
    ),
    (
        "analyst",
        &["analy", "calculat", "compute", "compare", "evaluat", "assess", "model", "ratio", "estimat"],
    ),
    (
        "writer",
        &["write", "draft", "summar", "report", "compose", "present", "document"],
    ),
];

/// Sub-tasks from a planner reply: one per numbered or bulleted line, each
/// with an optional `[role]` prefix.
pub fn parse_plan(plan: &str) -> Vec<(Option<String>, String)> {
    PLAN_ITEM
        .captures_iter(plan)
        .filter_map(|caps| {
            let item = caps.get(1)?.as_str().trim();
            match ROLE_PREFIX.captures(item) {
                Some(prefixed) => Some((
                    Some(prefixed[1].to_lowercase()),
                    prefixed[2].trim().to_string(),
                )),
                None => Some((None, item.to_string())),
            }
        })
        .filter(|(_, description)| !description.is_empty())
        .take(MAX_PLAN_ITEMS)
        .collect()
}

/// Most suitable worker: the planner's choice if it is on the roster, else
/// the first keyword match, else the first worker.
fn choose_role(subtask: &SubTask, workers: &[String]) -> String {
    if let Some(requested) = &subtask.role {
        if let Some(worker) = workers.iter().find(|w| w.eq_ignore_ascii_case(requested)) {
            return worker.clone();
        }
    }
    let description = subtask.description.to_lowercase();
    for (role, keywords) in ROLE_KEYWORDS {
        if keywords.iter().any(|k| description.contains(k)) {
            if let Some(worker) = workers.iter().find(|w| w.as_str() == *role) {
                return worker.clone();
            }
        }
    }
    workers.first().cloned().unwrap_or_default()
}

fn rejected(verdict: &str) -> bool {
    REJECTION.is_match(verdict)
}

/// Goal-directed decomposition into tracked sub-tasks.
pub struct MagenticStrategy {
    options: MagenticOptions,
}

impl MagenticStrategy {
    /// Strategy with validated options.
    pub fn new(options: MagenticOptions) -> Self {
        Self { options }
    }

    fn plan_context(&self, task: &str) -> String {
        format!(
            "Goal: {task}\n\nAvailable workers: {}\n\nBreak the goal into a numbered list \
             of sub-tasks, one per line. Prefix a line with `[worker]` to choose who does it.",
            self.options.workers.join(", ")
        )
    }

    fn worker_context(task: &str, ledger: &SubTaskLedger, description: &str) -> String {
        let done = completed_results(ledger);
        let mut context = format!("Overall goal: {task}\n\n");
        if !done.is_empty() {
            context.push_str(&format!("Results so far:\n\n{done}\n\n"));
        }
        context.push_str(&format!("Your sub-task: {description}"));
        context
    }

    fn validation_context(description: &str, output: &str) -> String {
        format!(
            "Sub-task: {description}\n\nOutput:\n{output}\n\n\
             Does the output fully resolve the sub-task? Reply `ACCEPT` or `REJECT: <reason>`."
        )
    }

    fn progress(ledger: &SubTaskLedger) -> f64 {
        let total = ledger.total_count().max(1) as f64;
        0.1 + 0.8 * (ledger.resolved_count() as f64 / total)
    }
}

fn completed_results(ledger: &SubTaskLedger) -> String {
    ledger
        .completed()
        .map(|t| {
            format!(
                "#### {}\n{}",
                t.description,
                t.output.as_deref().unwrap_or("").trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl PatternStrategy for MagenticStrategy {
    fn pattern(&self) -> Pattern {
        Pattern::Magentic
    }

    async fn run(&self, ctx: &ExecutionContext, task: &str) -> MaestroResult<ExecutionResult> {
        let workers = &self.options.workers;
        let max_steps = self.options.max_steps;
        let mut ledger = SubTaskLedger::new();
        let mut notes = Vec::new();

        let plan = ctx
            .run_step("plan", PLANNER, self.plan_context(task), false)
            .await?;
        let items = parse_plan(&plan);
        if items.is_empty() {
            ledger.add(task, None);
        }
        for (role, description) in items {
            ledger.add(description, role);
        }
        info!(execution_id = %ctx.id(), subtasks = ledger.total_count(), "Plan ready");
        ctx.advance_progress(0.1)?;

        let mut steps = 0u32;
        while let Some((index, description, role)) = ledger
            .next_open()
            .map(|t| (t.index, t.description.clone(), choose_role(t, workers)))
        {
            if steps >= max_steps {
                let unresolved = ledger.unresolved().join("; ");
                info!(execution_id = %ctx.id(), max_steps, "Step budget exhausted");
                notes.push(format!(
                    "budget exceeded: maxSteps={max_steps} reached; unresolved sub-tasks: {unresolved}"
                ));
                break;
            }
            steps += 1;
            ledger.mark_running(index);

            let input = Self::worker_context(task, &ledger, &description);
            let output = match ctx.run_agent(&role, input).await {
                Ok(output) => output,
                Err(MaestroError::Cancelled) => return Err(MaestroError::Cancelled),
                Err(err) => {
                    warn!(execution_id = %ctx.id(), subtask = %description, error = %err, "Sub-task failed");
                    ledger.mark_failed(index, err.to_string());
                    ctx.fail_task(&description)?;
                    ctx.advance_progress(Self::progress(&ledger))?;
                    continue;
                }
            };

            if self.options.validate {
                match ctx
                    .run_agent(VALIDATOR, Self::validation_context(&description, &output))
                    .await
                {
                    Ok(verdict) if rejected(&verdict) => {
                        if ledger.reopen(index) {
                            info!(execution_id = %ctx.id(), subtask = %description, "Validator rejected output, re-opening");
                            continue;
                        }
                        warn!(execution_id = %ctx.id(), subtask = %description, "Validator rejected output again");
                        ledger.mark_failed(index, "rejected by validator twice");
                        ctx.fail_task(&description)?;
                        ctx.advance_progress(Self::progress(&ledger))?;
                        continue;
                    }
                    Ok(_) => {}
                    Err(MaestroError::Cancelled) => return Err(MaestroError::Cancelled),
                    Err(err) => {
                        warn!(execution_id = %ctx.id(), subtask = %description, error = %err, "Validation unavailable, accepting output");
                        notes.push(format!("validation of '{description}' skipped: {err}"));
                    }
                }
            }

            ledger.mark_completed(index, output);
            ctx.complete_task(&description)?;
            ctx.advance_progress(Self::progress(&ledger))?;
        }

        let mut failed = 0;
        for subtask in ledger.all() {
            if let SubTaskStatus::Failed { reason } = &subtask.status {
                failed += 1;
                notes.push(format!("sub-task '{}' failed: {reason}", subtask.description));
            }
        }

        if ledger.completed_count() == 0 {
            return Err(MaestroError::agent(
                "magentic",
                format!(
                    "no sub-task completed ({failed} of {} failed)",
                    ledger.total_count()
                ),
            ));
        }

        let mut synthesis = format!(
            "Goal: {task}\n\nCompleted sub-tasks:\n\n{}",
            completed_results(&ledger)
        );
        let unfinished: Vec<&str> = ledger
            .all()
            .iter()
            .filter(|t| t.status != SubTaskStatus::Completed)
            .map(|t| t.description.as_str())
            .collect();
        if !unfinished.is_empty() {
            synthesis.push_str(&format!("\n\nNot completed: {}", unfinished.join("; ")));
        }
        synthesis.push_str("\n\nWrite the final answer to the goal.");

        let output = ctx.run_step("synthesize", MANAGER, synthesis, false).await?;
        Ok(ExecutionResult::new(output).with_notes(notes))
    }
}
