use regex::Regex;
use std::sync::LazyLock;

/// Decides whether a group chat message signals agreement.
pub trait ConsensusPolicy: Send + Sync {
    /// Policy name, for logs.
    fn name(&self) -> &str;

    /// Whether `message` from `speaker` signals consensus.
    fn reached(&self, speaker: &str, message: &str) -> bool;
}

#[allow(clippy::expect_used)]
static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*(?:\*\*)?(?:\[CONSENSUS\]|CONSENSUS(?:\s+REACHED)?\s*[:.!]|CONSENSUS REACHED\b)[ \t]*",
    )
    .expect("valid consensus marker regex")
});

/// Default policy: a line starting with `CONSENSUS:`, `[CONSENSUS]` or
/// `CONSENSUS REACHED`, upper case, from anyone.
///
/// Matching only at line start keeps prose like "no consensus reached yet"
/// from ending the discussion.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerConsensus;

impl ConsensusPolicy for MarkerConsensus {
    fn name(&self) -> &str {
        "marker"
    }

    fn reached(&self, _speaker: &str, message: &str) -> bool {
        MARKER.is_match(message)
    }
}

/// Strip a leading consensus marker from the first line that carries one.
pub(crate) fn strip_marker(message: &str) -> String {
    let stripped = MARKER.replace(message, "");
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        message.trim().to_string()
    } else {
        trimmed.to_string()
    }
}
