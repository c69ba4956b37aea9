use super::{fraction, sections, PatternStrategy};
use crate::context::ExecutionContext;
use crate::options::HandoffOptions;
use crate::types::{ExecutionResult, Pattern};
use async_trait::async_trait;
use maestro_core::MaestroResult;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{info, warn};

#[allow(clippy::expect_used)]
static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:\*\*)?handoff(?:[ \t]+to)?[ \t]*:[ \t]*([A-Za-z][\w-]*)(.*)$")
        .expect("valid handoff directive regex")
});

/// A request to transfer control, parsed from an agent's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffDirective {
    /// Role to hand over to.
    pub target: String,
    /// Why, if the agent said.
    pub rationale: Option<String>,
}

/// Last `HANDOFF: <role> [| rationale]` line in `output`, if any.
pub fn parse_handoff(output: &str) -> Option<HandoffDirective> {
    DIRECTIVE.captures_iter(output).last().map(|caps| HandoffDirective {
        target: caps[1].to_string(),
        rationale: caps
            .get(2)
            .map(|m| {
                m.as_str()
                    .trim_start_matches(|c: char| c.is_whitespace() || "|:,.-*".contains(c))
                    .trim()
                    .to_string()
            })
            .filter(|r| !r.is_empty()),
    })
}

/// `output` with directive lines removed.
fn strip_directives(output: &str) -> String {
    let stripped = DIRECTIVE.replace_all(output, "");
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        output.trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Data-driven transfers of control, bounded by `maxHandoffs`.
pub struct HandoffStrategy {
    options: HandoffOptions,
}

impl HandoffStrategy {
    /// Strategy with validated options.
    pub fn new(options: HandoffOptions) -> Self {
        Self { options }
    }

    fn agent_context(&self, task: &str, transcript: &[(String, String)], role: &str) -> String {
        let others: Vec<&str> = self
            .options
            .agents
            .iter()
            .map(String::as_str)
            .filter(|a| *a != role)
            .collect();
        let mut context = format!("Task: {task}\n\n");
        if !transcript.is_empty() {
            let history = sections(transcript.iter().map(|(r, o)| (r.as_str(), o.as_str())));
            context.push_str(&format!("Work so far:\n\n{history}\n\n"));
        }
        context.push_str(&format!(
            "You are the {role}. Either complete the task, or hand over by ending \
             with a line `HANDOFF: <role> | <reason>` where <role> is one of: {}.",
            others.join(", ")
        ));
        context
    }
}

#[async_trait]
impl PatternStrategy for HandoffStrategy {
    fn pattern(&self) -> Pattern {
        Pattern::Handoff
    }

    async fn run(&self, ctx: &ExecutionContext, task: &str) -> MaestroResult<ExecutionResult> {
        let max_handoffs = self.options.max_handoffs;
        let mut current = self.options.initial_agent.clone();
        let mut transcript: Vec<(String, String)> = Vec::new();
        let mut handoffs: u32 = 0;
        let mut notes = Vec::new();

        loop {
            let input = self.agent_context(task, &transcript, &current);
            let output = ctx.run_step(&current, &current, input, false).await?;
            let directive = parse_handoff(&output);
            transcript.push((current.clone(), output));

            let Some(directive) = directive else {
                break;
            };
            let Some(target) = self
                .options
                .agents
                .iter()
                .find(|a| a.eq_ignore_ascii_case(&directive.target))
                .cloned()
            else {
                warn!(
                    execution_id = %ctx.id(),
                    from = %current,
                    target = %directive.target,
                    "Handoff to unknown agent ignored"
                );
                notes.push(format!(
                    "handoff from '{current}' to unknown agent '{}' ignored",
                    directive.target
                ));
                break;
            };
            if handoffs >= max_handoffs {
                info!(execution_id = %ctx.id(), max_handoffs, "Handoff budget exhausted");
                notes.push(format!(
                    "budget exceeded: maxHandoffs={max_handoffs} reached; pending handoff \
                     from '{current}' to '{target}' not followed"
                ));
                break;
            }

            handoffs += 1;
            info!(
                execution_id = %ctx.id(),
                from = %current,
                to = %target,
                rationale = directive.rationale.as_deref().unwrap_or(""),
                handoff = handoffs,
                "Handing off"
            );
            current = target;
            let budget = usize::try_from(max_handoffs).unwrap_or(usize::MAX).saturating_add(1);
            ctx.advance_progress(fraction(usize::try_from(handoffs).unwrap_or(0), budget))?;
        }

        let (_, last) = transcript.pop().unwrap_or_default();
        Ok(ExecutionResult::new(strip_directives(&last)).with_notes(notes))
    }
}
