//! Bounded polling primitives.
//!
//! This library provides the waiting half of every orchestrator operation:
//! install/upgrade convergence, teardown, plan completion, job runs, and
//! metric arrival all reduce to "probe, and if not there yet, sleep and probe
//! again". Key concepts:
//!
//! - **Probe**: one observation of remote state, either ready or pending.
//! - **Retry policy**: how long to sleep between probes and when to give up.
//! - **Convergence**: the point where observed state matches what was asked for.
//!
//! # Invariants
//!
//! - Every policy is bounded by an attempt count, a deadline, or both
//! - Exhausting a policy is always reported as an error, never swallowed
//! - Probes run strictly one after another; nothing is spawned

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Default wait between attempts.
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_millis(1000);

/// Default maximum number of attempts.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Polling errors.
#[derive(Debug, Error)]
pub enum PollError<E> {
    /// The probe itself failed with a non-retryable error.
    #[error("{0}")]
    Probe(#[source] E),

    /// The retry budget ran out before the probe reported ready.
    #[error("gave up waiting for {resource} after {attempts} attempts ({elapsed:?})")]
    Exhausted {
        resource: String,
        attempts: u32,
        elapsed: Duration,
        last_status: Option<String>,
    },
}

impl<E> PollError<E> {
    /// Returns true if the retry budget ran out.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// The awaited condition holds.
    Ready(T),

    /// Not there yet; the string describes the last observed state.
    Pending(String),
}

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Sleep the same amount after every attempt.
    Fixed,

    /// Multiply the delay by `factor` after every attempt, capped at `max_wait`.
    Exponential { factor: u32, max_wait: Duration },
}

/// Retry policy for a polling loop.
///
/// Construct with [`RetryPolicy::attempts`] or [`RetryPolicy::deadline`];
/// both guarantee the loop is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    wait: Duration,
    max_attempts: Option<u32>,
    timeout: Option<Duration>,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::attempts(DEFAULT_RETRY_WAIT, DEFAULT_RETRY_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Poll at most `max_attempts` times, sleeping `wait` in between.
    ///
    /// A zero attempt count is raised to one.
    pub fn attempts(wait: Duration, max_attempts: u32) -> Self {
        Self {
            wait,
            max_attempts: Some(max_attempts.max(1)),
            timeout: None,
            backoff: Backoff::Fixed,
        }
    }

    /// Poll every `interval` until `timeout` has elapsed.
    pub fn deadline(interval: Duration, timeout: Duration) -> Self {
        Self {
            wait: interval,
            max_attempts: None,
            timeout: Some(timeout),
            backoff: Backoff::Fixed,
        }
    }

    /// Set the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Add (or replace) an attempt bound.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Add (or replace) a deadline bound.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Base wait between attempts.
    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Attempt bound, if any.
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Deadline bound, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Delay to sleep after the given (1-based) attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.wait,
            Backoff::Exponential { factor, max_wait } => {
                let exponent = attempt.saturating_sub(1);
                let multiplier = factor.max(1).saturating_pow(exponent);
                self.wait.saturating_mul(multiplier).min(max_wait)
            }
        }
    }

    /// Returns true once either bound has been reached.
    pub fn is_exhausted(&self, attempts: u32, elapsed: Duration) -> bool {
        let attempts_spent = self.max_attempts.is_some_and(|max| attempts >= max);
        let time_spent = self.timeout.is_some_and(|timeout| elapsed >= timeout);
        attempts_spent || time_spent
    }

    /// Time left before the deadline, if one is set.
    fn remaining(&self, elapsed: Duration) -> Option<Duration> {
        self.timeout.map(|timeout| timeout.saturating_sub(elapsed))
    }
}

/// Probe repeatedly until ready, a probe error, or the policy runs out.
///
/// The probe is always called at least once. When a deadline is set, the
/// final sleep is shortened so the last probe lands on the deadline.
pub async fn poll_until<T, E, F, Fut>(
    resource: &str,
    policy: &RetryPolicy,
    mut probe: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>, E>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let last_status = match probe().await.map_err(PollError::Probe)? {
            Probe::Ready(value) => {
                debug!(
                    resource,
                    attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Condition reached"
                );
                return Ok(value);
            }
            Probe::Pending(status) => status,
        };

        let elapsed = start.elapsed();
        if policy.is_exhausted(attempts, elapsed) {
            return Err(PollError::Exhausted {
                resource: resource.to_string(),
                attempts,
                elapsed,
                last_status: Some(last_status),
            });
        }

        let mut delay = policy.delay_for(attempts);
        if let Some(remaining) = policy.remaining(elapsed) {
            delay = delay.min(remaining);
        }

        debug!(
            resource,
            attempts,
            status = %last_status,
            delay_ms = delay.as_millis() as u64,
            "Not ready, will retry"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Convergence status for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Resource has converged (current matches desired).
    Converged,

    /// Resource is converging (current is moving toward desired).
    Converging,

    /// Resource has diverged (requires intervention).
    Diverged,

    /// Status is unknown (insufficient data).
    Unknown,
}

impl ConvergenceStatus {
    /// Classify a healthy task count against the expected count.
    ///
    /// With `allow_more`, more healthy tasks than expected still counts as
    /// converged.
    pub fn from_task_count(healthy: usize, expected: usize, allow_more: bool) -> Self {
        let reached = if allow_more {
            healthy >= expected
        } else {
            healthy == expected
        };

        if reached {
            Self::Converged
        } else {
            Self::Converging
        }
    }

    /// Returns true if the resource has converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }

    /// Returns true if the resource is still converging.
    pub fn is_converging(&self) -> bool {
        matches!(self, Self::Converging)
    }
}
