//! Bounded retry with exponential backoff.
//!
//! External calls (LLM, client-delegated tools) retry on a fixed list of
//! transient status codes and on network errors, with exponential backoff
//! and jitter from a configured base delay up to an attempt cap. Client
//! errors are never retried.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::cancel::CancellationSignal;
use crate::error::LlmError;

/// Status codes retried as transient.
pub const TRANSIENT_STATUSES: [u16; 7] = [408, 425, 429, 500, 502, 503, 529];

/// Retry behavior for external calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
    /// Ceiling on the computed delay.
    pub max_delay: Duration,
    /// Wall-clock bound per attempt. An attempt that exceeds it counts as a
    /// (transient) network failure.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether the error is worth retrying.
    #[must_use]
    pub fn is_transient(&self, error: &LlmError) -> bool {
        match error {
            LlmError::Status { status, .. } => TRANSIENT_STATUSES.contains(status),
            LlmError::Network(_) => true,
            LlmError::InvalidResponse(_) | LlmError::Cancelled => false,
        }
    }

    /// Backoff before retry number `attempt` (1-based), with jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        // Up to 50% jitter so synchronized retries spread out.
        let jitter = exponential.mul_f64(fastrand::f64() * 0.5);
        exponential + jitter
    }
}

/// Run `op` under the retry policy, observing the cancellation signal
/// between attempts.
pub async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    signal: &CancellationSignal,
    mut op: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 1u32;
    loop {
        if signal.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        let outcome = match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => Err(LlmError::network(format!(
                "request timed out after {:?}",
                policy.attempt_timeout
            ))),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(error) if attempt < policy.max_attempts && policy.is_transient(&error) => {
                let delay = policy.delay_for(attempt);
                warn!(attempt, ?delay, error = %error, "transient error, retrying");
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = signal.cancelled() => return Err(LlmError::Cancelled),
                }
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
