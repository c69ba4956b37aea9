use crate::invoker::{AgentInvoker, InvocationRequest};
use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Type alias for the injectable sleep function used in tests.
#[cfg(test)]
type SleepFn = Box<
    dyn Fn(u64) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + Sync,
>;

/// Bounded retry behaviour for a single agent call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    /// Exponential backoff for `attempt` (0-based), capped at `backoff_max_ms`.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        delay.min(self.backoff_max_ms)
    }
}

/// Determines whether an error is transient and worth retrying.
///
/// Timeouts are always retryable. Agent and HTTP failures are retryable when
/// they look like rate limiting, server errors or connection trouble. A 400
/// is never retried.
pub fn is_retryable(err: &MaestroError) -> bool {
    let msg = match err {
        MaestroError::Timeout { .. } => return true,
        MaestroError::AgentInvocation { message, .. } => message.to_lowercase(),
        MaestroError::Http(message) => message.to_lowercase(),
        _ => return false,
    };

    if msg.contains("400") {
        return false;
    }

    msg.contains("429")
        || msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("temporar")
        || msg.contains("connection")
        || msg.contains("5xx")
        || msg.contains("500")
        || msg.contains("502")
        || msg.contains("503")
        || msg.contains("504")
}

/// Result of one logical call, including how many attempts it took.
#[derive(Debug)]
pub struct CallOutcome {
    /// The final result after retries.
    pub result: MaestroResult<String>,
    /// Attempts made (1 = no retry).
    pub attempts: u32,
    /// Wall time across all attempts, backoff included.
    pub elapsed: Duration,
}

/// Wraps an [`AgentInvoker`] with a per-call timeout and bounded retries.
///
/// Each attempt is subject to `call_timeout`; expiry becomes a retryable
/// [`MaestroError::Timeout`]. Transient failures are retried with capped
/// exponential backoff. When retries run out, HTTP failures are reported as
/// [`MaestroError::AgentInvocation`] for the role that failed.
pub struct RetryingInvoker {
    inner: Arc<dyn AgentInvoker>,
    policy: RetryPolicy,
    call_timeout: Duration,
    /// Injectable sleep function for testing (allows skipping real delays).
    #[cfg(test)]
    sleep_fn: Option<SleepFn>,
}

impl RetryingInvoker {
    /// Wrap `inner` with `policy` and a per-attempt timeout.
    pub fn new(inner: Arc<dyn AgentInvoker>, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            inner,
            policy,
            call_timeout,
            #[cfg(test)]
            sleep_fn: None,
        }
    }

    /// The retry policy in effect.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The per-attempt timeout.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    async fn do_sleep(&self, ms: u64) {
        #[cfg(test)]
        if let Some(ref f) = self.sleep_fn {
            f(ms).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    async fn attempt(&self, request: &InvocationRequest) -> MaestroResult<String> {
        match tokio::time::timeout(self.call_timeout, self.inner.invoke(request)).await {
            Ok(result) => result,
            Err(_) => Err(MaestroError::Timeout {
                role: request.role.clone(),
                after_ms: u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Run one logical call.
    ///
    /// With `retry_all` set, non-transient agent failures are retried too
    /// (used for steps explicitly flagged retryable).
    pub async fn call(&self, request: &InvocationRequest, retry_all: bool) -> CallOutcome {
        self.call_until(request, retry_all, &CancellationToken::new())
            .await
    }

    /// Like [`call`](Self::call), but stops retrying once `cancel` fires.
    ///
    /// An attempt already in flight runs to completion; no new attempt is
    /// started and a pending backoff is cut short. The result is then
    /// [`MaestroError::Cancelled`] unless that attempt succeeded.
    pub async fn call_until(
        &self,
        request: &InvocationRequest,
        retry_all: bool,
        cancel: &CancellationToken,
    ) -> CallOutcome {
        let start = Instant::now();
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() && attempts > 0 {
                debug!(role = %request.role, attempts, "Cancelled between attempts");
                return CallOutcome {
                    result: Err(MaestroError::Cancelled),
                    attempts,
                    elapsed: start.elapsed(),
                };
            }
            attempts += 1;
            let err = match self.attempt(request).await {
                Ok(text) => {
                    return CallOutcome {
                        result: Ok(text),
                        attempts,
                        elapsed: start.elapsed(),
                    }
                }
                Err(e) => e,
            };

            let retryable = is_retryable(&err)
                || (retry_all
                    && matches!(
                        err,
                        MaestroError::AgentInvocation { .. } | MaestroError::Http(_)
                    ));

            if !retryable || attempts > self.policy.max_retries {
                warn!(
                    role = %request.role,
                    attempts,
                    error = %err,
                    "Agent call failed, giving up"
                );
                return CallOutcome {
                    result: Err(finalize(err, &request.role, attempts)),
                    attempts,
                    elapsed: start.elapsed(),
                };
            }

            let delay = self.policy.backoff_ms(attempts - 1);
            info!(
                role = %request.role,
                attempt = attempts,
                delay_ms = delay,
                error = %err,
                "Retryable agent error, backing off"
            );
            tokio::select! {
                _ = self.do_sleep(delay) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }
}

fn finalize(err: MaestroError, role: &str, attempts: u32) -> MaestroError {
    match err {
        MaestroError::Http(message) => MaestroError::AgentInvocation {
            role: role.to_string(),
            message: format!("{message} (after {attempts} attempt(s))"),
        },
        MaestroError::AgentInvocation { role, message } if attempts > 1 => {
            MaestroError::AgentInvocation {
                role,
                message: format!("{message} (after {attempts} attempt(s))"),
            }
        }
        other => other,
    }
}

#[async_trait]
impl AgentInvoker for RetryingInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> MaestroResult<String> {
        self.call(request, false).await.result
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
