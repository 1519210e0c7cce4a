//! Bounded retry policies.
//!
//! Two policies with different trigger conditions:
//!
//! | Policy | Attempts | Retries on | Delay |
//! |--------|----------|------------|-------|
//! | [`FixedAttemptPolicy`] | 5 | any failure | constant pause, doubling timeout floor |
//! | [`RateLimitPolicy`] | 3 | HTTP 429 only | `base_delay * attempt` |

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FetchError, FetchErrorKind};

/// Per-source retry selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    #[default]
    None,
    FixedAttempt,
    RateLimited,
}

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same pause after every failed attempt.
    Fixed { delay: Duration },
    /// `base * attempt`, capped at `max`.
    Linear { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay after the 1-based `attempt` failed.
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Linear { base, max } => base.saturating_mul(attempt.max(1)).min(max),
        }
    }
}

/// Legacy time-series policy: retry anything, pause a constant second,
/// and give each attempt a longer timeout than the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedAttemptPolicy {
    pub max_attempts: u32,
    pub timeout_floor: Duration,
    pub backoff: Backoff,
}

impl Default for FixedAttemptPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            timeout_floor: Duration::from_secs(2),
            backoff: Backoff::Fixed {
                delay: Duration::from_secs(1),
            },
        }
    }
}

impl FixedAttemptPolicy {
    /// Attempt `n` (1-based) gets at least `timeout_floor * 2^(n-1)`.
    pub fn timeout_for_attempt(&self, attempt: u32, budget_ms: u64) -> u64 {
        let exponent = attempt.saturating_sub(1).min(16);
        let floor = self
            .timeout_floor
            .saturating_mul(1_u32 << exponent)
            .as_millis();
        budget_ms.max(u64::try_from(floor).unwrap_or(u64::MAX))
    }

    /// Runs `attempt(n, timeout_ms)` until it succeeds or attempts run out.
    /// Returns the last error and the number of attempts made.
    pub async fn run<T, E, F, Fut>(&self, budget_ms: u64, mut attempt: F) -> (Result<T, E>, u32)
    where
        E: AsRef<FetchError>,
        F: FnMut(u32, u64) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut number = 1;
        loop {
            let timeout_ms = self.timeout_for_attempt(number, budget_ms);
            match attempt(number, timeout_ms).await {
                Ok(value) => return (Ok(value), number),
                Err(error) if number >= max_attempts => return (Err(error), number),
                Err(error) => {
                    tracing::debug!(
                        attempt = number,
                        error = %error.as_ref(),
                        "fixed-attempt policy retrying"
                    );
                    tokio::time::sleep(self.backoff.delay(number)).await;
                    number += 1;
                }
            }
        }
    }
}

/// Entity-search policy: only 429 is worth waiting out.
///
/// A `Retry-After` hint longer than the backoff cap is not honoured. The next
/// attempt then runs on the linear schedule, which can be well before the
/// upstream's requested wait (a 30 s hint still retries after 750 ms). The hint
/// is kept on the final `rate_limited` error so callers can back off themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Linear {
                base: Duration::from_millis(750),
                max: Duration::from_secs(10),
            },
        }
    }
}

impl RateLimitPolicy {
    /// Linear delay, raised to `Retry-After` when the upstream's hint fits under
    /// the backoff cap. Longer hints are ignored.
    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let linear = self.backoff.delay(attempt);
        let cap = match self.backoff {
            Backoff::Linear { max, .. } => max,
            Backoff::Fixed { delay } => delay,
        };
        match retry_after_secs.map(Duration::from_secs) {
            Some(hint) if hint <= cap => linear.max(hint),
            _ => linear,
        }
    }

    pub fn should_retry(error: &FetchError) -> bool {
        error.kind() == FetchErrorKind::RateLimited
    }

    pub async fn run<T, E, F, Fut>(&self, mut attempt: F) -> (Result<T, E>, u32)
    where
        E: AsRef<FetchError>,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut number = 1;
        loop {
            match attempt(number).await {
                Ok(value) => return (Ok(value), number),
                Err(error) if !Self::should_retry(error.as_ref()) || number >= max_attempts => {
                    return (Err(error), number);
                }
                Err(error) => {
                    let delay = self.delay_for(number, error.as_ref().retry_after_secs());
                    tracing::debug!(
                        attempt = number,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "rate limited; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    number += 1;
                }
            }
        }
    }
}
