use super::{fraction, PatternStrategy};
use crate::consensus::{strip_marker, ConsensusPolicy};
use crate::context::ExecutionContext;
use crate::options::GroupChatOptions;
use crate::types::{ExecutionResult, Pattern};
use async_trait::async_trait;
use maestro_core::MaestroResult;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

#[allow(clippy::expect_used)]
static NEXT_SPEAKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:\*\*)?next(?:[ \t]+speaker)?[ \t]*:[ \t]*\**[ \t]*([A-Za-z][\w-]*)")
        .expect("valid next-speaker regex")
});

/// Moderated discussion over a shared transcript.
pub struct GroupChatStrategy {
    options: GroupChatOptions,
    consensus: Arc<dyn ConsensusPolicy>,
}

impl GroupChatStrategy {
    /// Strategy with validated options and a consensus policy.
    pub fn new(options: GroupChatOptions, consensus: Arc<dyn ConsensusPolicy>) -> Self {
        Self { options, consensus }
    }

    /// Participant named on the moderator's `NEXT:` line, if it is one.
    fn pick_speaker(&self, moderator_output: &str) -> Option<&str> {
        let name = NEXT_SPEAKER.captures(moderator_output)?.get(1)?.as_str();
        self.options
            .participants
            .iter()
            .find(|p| p.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    fn moderator_context(&self, task: &str, transcript: &[(String, String)]) -> String {
        format!(
            "Topic: {task}\n\nParticipants: {}\n\nTranscript:\n{}\n\n\
             Reply `NEXT: <participant>` to choose who speaks next, or \
             `CONSENSUS: <agreed position>` if the group has converged.",
            self.options.participants.join(", "),
            render(transcript)
        )
    }

    fn participant_context(task: &str, transcript: &[(String, String)], speaker: &str) -> String {
        format!(
            "Topic: {task}\n\nTranscript:\n{}\n\nYou are {speaker}. Respond to the \
             discussion so far. If the group agrees, start a line with `CONSENSUS:`.",
            render(transcript)
        )
    }
}

fn render(transcript: &[(String, String)]) -> String {
    if transcript.is_empty() {
        return "(no messages yet)".to_string();
    }
    transcript
        .iter()
        .map(|(speaker, text)| format!("[{speaker}] {}", text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl PatternStrategy for GroupChatStrategy {
    fn pattern(&self) -> Pattern {
        Pattern::GroupChat
    }

    async fn run(&self, ctx: &ExecutionContext, task: &str) -> MaestroResult<ExecutionResult> {
        let participants = &self.options.participants;
        let moderator = &self.options.moderator;
        let max_turns = usize::try_from(self.options.max_turns).unwrap_or(usize::MAX);
        let mut transcript: Vec<(String, String)> = Vec::new();
        let mut turns = 0usize;
        let mut consensus: Option<String> = None;

        while turns < max_turns {
            let direction = ctx
                .run_agent(moderator, self.moderator_context(task, &transcript))
                .await?;
            // the moderator may only close a discussion that has started
            if turns > 0 && self.consensus.reached(moderator, &direction) {
                info!(execution_id = %ctx.id(), turns, policy = self.consensus.name(), "Moderator declared consensus");
                consensus = Some(direction);
                break;
            }

            let speaker = match self.pick_speaker(&direction) {
                Some(name) => name.to_string(),
                None => {
                    let fallback = participants[turns % participants.len()].clone();
                    debug!(execution_id = %ctx.id(), fallback = %fallback, "No valid pick, using round-robin");
                    fallback
                }
            };

            let label = format!("turn {}: {speaker}", turns + 1);
            let input = Self::participant_context(task, &transcript, &speaker);
            let message = ctx.run_step(&label, &speaker, input, false).await?;
            turns += 1;
            let agreed = self.consensus.reached(&speaker, &message);
            transcript.push((speaker.clone(), message.clone()));
            // the final fraction is reserved for the terminal transition
            ctx.advance_progress(fraction(turns, max_turns + 1))?;

            if agreed {
                info!(execution_id = %ctx.id(), turns, speaker = %speaker, "Participant declared consensus");
                consensus = Some(message);
                break;
            }
        }

        match consensus {
            Some(message) => Ok(ExecutionResult::new(strip_marker(&message))),
            None => {
                let (_, last) = transcript.pop().unwrap_or_default();
                let result = ExecutionResult::new(last).with_note(format!(
                    "turn budget exhausted: maxTurns={} reached without consensus",
                    self.options.max_turns
                ));
                if self.options.require_consensus {
                    Ok(result.inconclusive())
                } else {
                    Ok(result)
                }
            }
        }
    }
}
