//! Bounded retry with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::metrics;

/// Backoff settings shared by every collaborator and store call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Cap on a server-provided `retry_after` in milliseconds.
    #[serde(default = "default_max_retry_after_ms")]
    pub max_retry_after_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_max_retry_after_ms() -> u64 {
    60_000
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retry_after_ms: default_max_retry_after_ms(),
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            max_retry_after_ms: default_max_retry_after_ms(),
        }
    }

    pub fn with_max_retry_after(mut self, cap: Duration) -> Self {
        self.max_retry_after_ms = cap.as_millis() as u64;
        self
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_millis(self.max_retry_after_ms)
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay after the given failed attempt (1-indexed).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Delays slept between consecutive attempts.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.attempts()).map(|a| self.delay_after(a)).collect()
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Errors that know whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool {
        true
    }

    /// Server-provided wait that overrides the schedule.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for std::io::Error {
    fn is_retryable(&self) -> bool {
        self.kind() != std::io::ErrorKind::NotFound
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or the
/// schedule is exhausted. The closure receives the 1-indexed attempt number.
pub async fn retry<T, E, F, Fut>(policy: &BackoffPolicy, name: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let schedule = policy.schedule();
    let total = policy.attempts();
    let mut attempt = 1;

    loop {
        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}/{}", name, attempt, total);
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !error.is_retryable() {
            debug!("{} failed with non-retryable error: {}", name, error);
            return Err(error);
        }

        let Some(scheduled) = schedule.get(attempt as usize - 1).copied() else {
            warn!("{} failed after {} attempts: {}", name, total, error);
            metrics::RETRIES_EXHAUSTED.with_label_values(&[name]).inc();
            return Err(error);
        };

        let delay = error
            .retry_after()
            .map(|wait| wait.min(policy.max_retry_after()))
            .unwrap_or(scheduled);
        warn!(
            "{} failed (attempt {}/{}), retrying in {:?}: {}",
            name, attempt, total, delay, error
        );
        metrics::RETRY_ATTEMPTS.with_label_values(&[name]).inc();
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Bound a future by `limit`, mapping expiry to the caller's error.
pub async fn with_timeout<T, E, Fut>(
    limit: Duration,
    future: Fut,
    on_timeout: impl FnOnce() -> E,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}
