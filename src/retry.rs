//! Per-object retries and per-cycle interval escalation.

use crate::error::SyncError;
use std::future::Future;
use std::time::Duration;
use tokio_retry2::{Retry, RetryError};

/// Delays slept between attempts: `base`, `2*base`, `4*base`, ...
///
/// `max_attempts` attempts need `max_attempts - 1` delays.
pub fn retry_delays(base: Duration, max_attempts: u32) -> impl Iterator<Item = Duration> {
    (0..max_attempts.saturating_sub(1)).map(move |n| base.saturating_mul(1u32 << n.min(31)))
}

/// Runs `operation` until it succeeds, fails permanently, or runs out of attempts.
///
/// `on_failure` sees every failed attempt with its 1-based number before the
/// next delay. Only [`SyncError::is_transient`] errors are retried; the last
/// error is returned once attempts are exhausted.
///
/// # Arguments
///
/// * `base_delay` - Delay before the second attempt; doubles afterwards
/// * `max_attempts` - Total attempts, including the first
/// * `operation` - Produces a fresh future per attempt
/// * `on_failure` - Called with the attempt number and its error
///
/// # Returns
///
/// The first successful value, or the last error.
pub async fn with_retries<T, Op, Fut, OnFail>(
    base_delay: Duration,
    max_attempts: u32,
    mut operation: Op,
    on_failure: OnFail,
) -> Result<T, SyncError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
    OnFail: Fn(u32, &SyncError),
{
    let on_failure = &on_failure;
    let mut attempt = 0u32;
    Retry::spawn(retry_delays(base_delay, max_attempts), || {
        attempt += 1;
        let current = attempt;
        let fut = operation();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) => {
                    on_failure(current, &e);
                    if e.is_transient() {
                        RetryError::to_transient(e)
                    } else {
                        RetryError::to_permanent(e)
                    }
                }
            }
        }
    })
    .await
}

/// Tracks consecutive failed cycles and stretches the interval when they pile up.
#[derive(Debug, Clone)]
pub struct CycleBackoff {
    interval: u64,
    ceiling: u64,
    threshold: u32,
    consecutive_failures: u32,
}

impl CycleBackoff {
    /// `interval` and `ceiling` are in the mode's time unit.
    pub fn new(interval: u64, threshold: u32, ceiling: u64) -> Self {
        Self {
            interval,
            ceiling,
            threshold: threshold.max(1),
            consecutive_failures: 0,
        }
    }

    /// Current delay between cycles.
    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Counts a failed cycle.
    ///
    /// When the count reaches the threshold the interval doubles (never past
    /// the ceiling, never below the current value), the counter resets, and
    /// the new interval is returned.
    pub fn record_failure(&mut self) -> Option<u64> {
        self.consecutive_failures += 1;
        if self.consecutive_failures < self.threshold {
            return None;
        }
        self.consecutive_failures = 0;
        let doubled = self.interval.saturating_mul(2).min(self.ceiling);
        self.interval = doubled.max(self.interval);
        Some(self.interval)
    }
}
