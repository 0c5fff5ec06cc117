//! Bounded retry with exponential backoff for outbound calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

/// Classification an error must provide to be retried.
pub trait Transient {
    /// Timeouts, 5xx and connection failures. Client errors are not.
    fn is_transient(&self) -> bool;

    /// Server-provided wait before the next attempt, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// The error an attempt turns into when it exceeds the call timeout.
    fn timed_out(after: Duration) -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Bound on a single attempt.
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn with_timeout(call_timeout: Duration) -> Self {
        Self {
            call_timeout,
            ..Self::default()
        }
    }

    /// Wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            call_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Not retryable; returned after the first attempt.
    #[error("{0}")]
    Permanent(E),
    /// Still failing after every attempt.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Run `op` under `policy`.
///
/// `label` names the call in logs.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;

        let result = match timeout(policy.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(policy.call_timeout)),
        };

        let err = match result {
            Ok(value) => {
                if attempt > 1 {
                    info!("{label} succeeded on attempt {attempt}");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_transient() {
            warn!("{label} failed permanently: {err}");
            return Err(RetryError::Permanent(err));
        }

        if attempt >= policy.max_attempts {
            warn!("{label} failed after {attempt} attempts: {err}");
            return Err(RetryError::Exhausted { attempts: attempt, last: err });
        }

        let backoff = policy.delay_for(attempt);
        let delay = match err.retry_after() {
            Some(hint) if hint > policy.max_delay => {
                warn!("{label} asked to wait {hint:?}, longer than we allow: {err}");
                return Err(RetryError::Exhausted { attempts: attempt, last: err });
            }
            Some(hint) => hint.max(backoff),
            None => backoff,
        };

        warn!("{label} attempt {attempt} failed ({err}), retrying in {delay:?}");
        sleep(delay).await;
    }
}
