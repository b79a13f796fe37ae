//! Bounded retry with backoff
//!
//! Transfers to a device and log stream spawns both fail transiently: the device may be busy, the
//! transport may drop the connection, a freshly spawned stream may end before it produced anything.
//! [`retry`] re-runs an operation a bounded number of times and sleeps between attempts according
//! to a [`Backoff`] schedule.
//!
//! ```
//! use common::retry::{Backoff, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::push();
//! assert_eq!(policy.max_retries, 3);
//! assert_eq!(policy.delay(2), Duration::from_secs(10));
//!
//! let spawn = RetryPolicy::attempts(4);
//! assert_eq!(spawn.max_retries, 3);
//! assert_eq!(spawn.delay(1), Duration::ZERO);
//! ```

use std::future::Future;
use std::time::Duration;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately
    None,
    /// Sleep `retry * step` before retry number `retry` (1-based)
    Linear(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt
    pub max_retries: usize,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Policy used for file transfers: 3 retries, sleeping 5s, 10s and 15s.
    #[must_use]
    pub fn push() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Linear(Duration::from_secs(5)),
        }
    }

    /// `count` attempts in total with no delay in between.
    #[must_use]
    pub fn attempts(count: usize) -> Self {
        Self {
            max_retries: count.saturating_sub(1),
            backoff: Backoff::None,
        }
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay(&self, retry: usize) -> Duration {
        match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Linear(step) => step.saturating_mul(retry as u32),
        }
    }

    /// Total number of attempts this policy allows.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }
}

/// Runs `operation` until it succeeds or the policy is exhausted.
///
/// Returns the error of the last attempt when every attempt failed.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut retries = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::info!("{} succeeded after {} retries", operation_name, retries);
                }
                return Ok(value);
            }
            Err(error) => {
                if retries >= policy.max_retries {
                    return Err(error);
                }
                retries += 1;
                let delay = policy.delay(retries);
                tracing::error!(
                    "{} failed, retrying in {}: {}",
                    operation_name,
                    humantime::format_duration(delay),
                    error
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
