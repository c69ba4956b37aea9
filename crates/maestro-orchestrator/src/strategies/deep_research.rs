use super::{sections, PatternStrategy};
use crate::context::ExecutionContext;
use crate::options::DeepResearchOptions;
use crate::profiles::{ANALYST, PLANNER, RESEARCHER, REVIEWER, SUMMARIZER, WRITER};
use crate::types::{ExecutionResult, Pattern};
use async_trait::async_trait;
use maestro_agent::AgentSearch;
use maestro_core::{MaestroError, MaestroResult};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

#[allow(clippy::expect_used)]
static APPROVAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:\*\*)?(?:(?i:verdict)[ \t]*:[ \t]*)?APPROVED\b").expect("valid approval regex")
});

fn approved(critique: &str) -> bool {
    APPROVAL.is_match(critique)
}

/// Plan → research → multi-source search → write, plus the optional stages
/// selected by `mode`. Optional stages only ever follow the core chain.
pub struct DeepResearchStrategy {
    options: DeepResearchOptions,
}

/// Position within the fixed stage order, used for progress.
struct Stages {
    done: usize,
    total: usize,
}

impl Stages {
    fn advance(&mut self, ctx: &ExecutionContext) -> MaestroResult<()> {
        self.done += 1;
        ctx.advance_progress(self.fraction(0.0))
    }

    /// Progress inside the current stage, `partial` in `[0, 1]`.
    fn fraction(&self, partial: f64) -> f64 {
        (self.done as f64 + partial) / (self.total as f64 + 1.0)
    }
}

impl DeepResearchStrategy {
    /// Strategy with validated options.
    pub fn new(options: DeepResearchOptions) -> Self {
        Self { options }
    }

    fn stage_count(&self) -> usize {
        let mode = self.options.mode;
        4 + usize::from(mode.has_analyst())
            + usize::from(mode.has_reviewer())
            + usize::from(mode.has_summarizer())
    }

    /// Fan out one search per source; failed sources are recorded and
    /// skipped, all sources failing is an error.
    async fn search_all(
        &self,
        ctx: &ExecutionContext,
        query: &str,
        stages: &Stages,
    ) -> MaestroResult<Vec<(String, String)>> {
        let sources = &self.options.sources;
        ctx.begin(format!("searching {} sources", sources.len()))?;

        let permits = Arc::new(Semaphore::new(ctx.max_parallel()));
        let mut set = JoinSet::new();
        for source in sources.iter().cloned() {
            let caller = ctx.caller().clone();
            let permits = permits.clone();
            let query = query.to_string();
            set.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) if caller.is_cancelled() => Err(MaestroError::Cancelled),
                    Ok(_permit) => caller.search(&source, &query).await,
                    Err(_) => Err(MaestroError::Orchestrator("concurrency limiter closed".into())),
                };
                (source, query, result)
            });
        }

        let mut findings = Vec::with_capacity(sources.len());
        let mut last_error = None;
        let mut joined = 0usize;
        while let Some(next) = set.join_next().await {
            let (source, query, result) = next.map_err(|e| {
                MaestroError::Orchestrator(format!("search task failed: {e}"))
            })?;
            joined += 1;
            let label = format!("search:{source}");
            match result {
                Ok(found) => {
                    ctx.record_step(&label, &AgentSearch::role_for(&source), &query, &found)?;
                    findings.push((source, found));
                }
                Err(MaestroError::Cancelled) => {}
                Err(err) => {
                    warn!(execution_id = %ctx.id(), source = %source, error = %err, "Search source failed");
                    ctx.fail_task(&label)?;
                    last_error = Some(err);
                }
            }
            ctx.advance_progress(stages.fraction(joined as f64 / sources.len() as f64))?;
        }
        ctx.checkpoint()?;

        if findings.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                MaestroError::Orchestrator("no search source returned findings".into())
            }));
        }
        findings.sort_by_key(|(source, _)| sources.iter().position(|s| s == source));
        Ok(findings)
    }
}

#[async_trait]
impl PatternStrategy for DeepResearchStrategy {
    fn pattern(&self) -> Pattern {
        Pattern::DeepResearch
    }

    async fn run(&self, ctx: &ExecutionContext, task: &str) -> MaestroResult<ExecutionResult> {
        let mode = self.options.mode;
        let mut stages = Stages {
            done: 0,
            total: self.stage_count(),
        };
        let mut notes = Vec::new();

        let plan = ctx
            .run_step(
                "plan",
                PLANNER,
                format!("Research question: {task}\n\nWrite a short research plan: questions to answer and evidence to collect."),
                false,
            )
            .await?;
        stages.advance(ctx)?;

        let research = ctx
            .run_step(
                "research",
                RESEARCHER,
                format!("Research question: {task}\n\nPlan:\n{plan}\n\nCollect the background the plan calls for."),
                false,
            )
            .await?;
        stages.advance(ctx)?;

        let query = format!("{task}\n\nFocus:\n{plan}");
        let findings = self.search_all(ctx, &query, &stages).await?;
        let total_sources = self.options.sources.len();
        if findings.len() < total_sources {
            notes.push(format!(
                "{} of {total_sources} search sources failed",
                total_sources - findings.len()
            ));
        }
        stages.advance(ctx)?;

        let evidence = sections(
            std::iter::once(("research", research.as_str()))
                .chain(findings.iter().map(|(s, f)| (s.as_str(), f.as_str()))),
        );
        let mut report = ctx
            .run_step(
                "write",
                WRITER,
                format!("Research question: {task}\n\nEvidence:\n\n{evidence}\n\nWrite the research report."),
                false,
            )
            .await?;
        stages.advance(ctx)?;

        if mode.has_analyst() {
            let analysis = ctx
                .run_step(
                    "analysis",
                    ANALYST,
                    format!("Report:\n{report}\n\nEvidence:\n\n{evidence}\n\nProduce a structured-data analysis of the figures involved."),
                    false,
                )
                .await?;
            report = format!("{}\n\n## Analysis\n\n{}", report.trim(), analysis.trim());
            stages.advance(ctx)?;
        }

        if mode.has_reviewer() {
            let max_revisions = self.options.max_revisions;
            let mut approved_after = None;
            for pass in 1..=max_revisions {
                let critique = ctx
                    .run_step(
                        &format!("review {pass}"),
                        REVIEWER,
                        format!("Research question: {task}\n\nReport:\n{report}\n\nCritique the report. Start with `APPROVED` if it needs no changes."),
                        false,
                    )
                    .await?;
                if approved(&critique) {
                    approved_after = Some(pass);
                    break;
                }
                report = ctx
                    .run_step(
                        &format!("revision {pass}"),
                        WRITER,
                        format!("Report:\n{report}\n\nCritique:\n{critique}\n\nRevise the report to address the critique."),
                        false,
                    )
                    .await?;
            }
            match approved_after {
                Some(pass) => info!(execution_id = %ctx.id(), pass, "Report approved"),
                None => notes.push(format!(
                    "review passes exhausted: maxRevisions={max_revisions} reached without approval"
                )),
            }
            stages.advance(ctx)?;
        }

        if mode.has_summarizer() {
            let summary = ctx
                .run_step(
                    "executive summary",
                    SUMMARIZER,
                    format!("Report:\n{report}\n\nWrite the executive summary."),
                    false,
                )
                .await?;
            report = format!("## Executive Summary\n\n{}\n\n{}", summary.trim(), report.trim());
            stages.advance(ctx)?;
        }

        Ok(ExecutionResult::new(report).with_notes(notes))
    }
}
