//! Retry controller: bounded exponential backoff around external calls.
//!
//! Every call to an external dependency (source fetch, warehouse
//! insert, dead-letter append, ledger access) goes through
//! [`execute`]. Each attempt is classified as success, retryable
//! failure, or fatal failure; fatal failures abort immediately without
//! consuming the remaining budget, and exhaustion is returned as a
//! value rather than raised past this boundary, so the caller decides
//! the record's fate.

use std::future::Future;
use std::time::Duration;

use batchrun_types::error::DependencyError;
use serde::{Deserialize, Serialize};

/// Retry configuration for one class of dependency call.
///
/// Immutable; shared read-only across all retry invocations in a run.
/// The controller itself is state-free between calls; each invocation
/// owns its own attempt counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first attempt.
    pub max_attempts: u32,
    /// Backoff base: delay before attempt k+1 is `base * 2^(k-1)`.
    pub base_delay_ms: u64,
    /// Ceiling applied to the exponential delay.
    pub max_delay_ms: u64,
    /// Perturb delays by bounded random jitter to avoid synchronized
    /// retry storms across concurrent job instances.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Higher-tolerance policy for dead-letter delivery: losing a
    /// record without trace is worse than a slow run.
    #[must_use]
    pub fn tolerant() -> Self {
        Self {
            max_attempts: 6,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }

    /// Zero-delay policy for tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
        }
    }
}

/// Terminal outcome of a retry sequence that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// A non-retryable failure aborted the sequence. Fatal errors are
    /// never retried, so `attempts` counts the attempt that hit it.
    #[error("fatal error on attempt {attempts}: {source}")]
    Fatal {
        attempts: u32,
        #[source]
        source: DependencyError,
    },
    /// Every attempt failed retryably and the budget ran out.
    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: DependencyError },
}

impl RetryError {
    /// Number of attempts made before giving up.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Fatal { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The error from the final attempt.
    #[must_use]
    pub fn last_error(&self) -> &DependencyError {
        match self {
            Self::Fatal { source, .. } => source,
            Self::Exhausted { last, .. } => last,
        }
    }
}

/// Compute the delay before the attempt after `attempt` (1-based).
///
/// A server-provided `retry_after_ms` hint overrides the exponential
/// schedule. Without jitter the schedule is deterministic and
/// non-decreasing up to `max_delay_ms`; with jitter a bounded random
/// fraction (up to 25%) is added on top.
#[must_use]
pub fn compute_backoff(policy: &RetryPolicy, err: &DependencyError, attempt: u32) -> Duration {
    if let Some(ms) = err.retry_after_ms {
        return Duration::from_millis(ms);
    }

    let exp = policy
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let capped = exp.min(policy.max_delay_ms);

    let delay_ms = if policy.jitter && capped > 0 {
        use rand::Rng;
        capped + rand::thread_rng().gen_range(0..=capped / 4)
    } else {
        capped
    };

    Duration::from_millis(delay_ms)
}

/// Run `op` under `policy`, classifying each attempt.
///
/// `what` labels the operation in log output. Suspension points are
/// the awaited operation itself and the backoff sleeps; waiting here
/// never blocks other in-flight records.
///
/// # Errors
///
/// Returns [`RetryError::Fatal`] on the first non-retryable failure and
/// [`RetryError::Exhausted`] when the attempt budget runs out.
pub async fn execute<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DependencyError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => {
                tracing::error!(
                    operation = what,
                    attempt,
                    category = %err.category,
                    code = %err.code,
                    "Fatal error, aborting without retry"
                );
                return Err(RetryError::Fatal {
                    attempts: attempt,
                    source: err,
                });
            }
            Err(err) if attempt >= max_attempts => {
                tracing::error!(
                    operation = what,
                    attempt,
                    max_attempts,
                    category = %err.category,
                    code = %err.code,
                    "Retry budget exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }
            Err(err) => {
                let delay = compute_backoff(policy, &err, attempt);
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = delay.as_millis() as u64;
                tracing::warn!(
                    operation = what,
                    attempt,
                    max_attempts,
                    delay_ms,
                    category = %err.category,
                    code = %err.code,
                    "Retryable error, will retry"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
