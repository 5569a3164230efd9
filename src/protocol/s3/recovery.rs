//! Retry policies for S3 operations
//!
//! Network operations are inherently unreliable. [`with_retry`] re-runs an
//! operation while it fails with a transport error
//! ([`S3Error::is_transport`]), sleeping between attempts according to a
//! [`RetryPolicy`]. Domain errors (a missing object, a checksum mismatch) and
//! configuration or permission errors are returned at once.
//!
//! Two presets mirror how the storage client uses retries:
//! - [`RetryPolicy::read`]: 3 retries, exponential from 2s, capped at 3s
//! - [`RetryPolicy::delete`]: 5 retries, exponential from 5s with 20% jitter,
//!   capped at 5 minutes
//!
//! # Example
//!
//! ```no_run
//! # use orbit_storage::protocol::s3::recovery::{RetryPolicy, BackoffStrategy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy {
//!     max_attempts: 5,
//!     initial_delay: Duration::from_millis(100),
//!     max_delay: Duration::from_secs(30),
//!     backoff: BackoffStrategy::ExponentialWithJitter,
//!     ..Default::default()
//! };
//! ```

use super::error::S3Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff strategy to use
    pub backoff: BackoffStrategy,

    /// Jitter factor (0.0-1.0), used by [`BackoffStrategy::ExponentialWithJitter`]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(60),
            backoff: BackoffStrategy::ExponentialWithJitter,
            jitter_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Policy for object reads: 3 retries, 2s doubling, capped at 3s
    pub fn read() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(3),
            backoff: BackoffStrategy::Exponential,
            jitter_factor: 0.0,
        }
    }

    /// Policy for deletes: 5 retries, 5s doubling with 20% jitter, capped at 5 minutes
    pub fn delete() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5 * 60),
            backoff: BackoffStrategy::ExponentialWithJitter,
            jitter_factor: 0.2,
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::read()
        }
    }

    /// Number of retries after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }

    /// Calculate the delay after failed attempt number `attempt` (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_delay = match self.backoff {
            BackoffStrategy::Linear => self.initial_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential | BackoffStrategy::ExponentialWithJitter => {
                let multiplier = 2_u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                self.initial_delay.saturating_mul(multiplier)
            }
            BackoffStrategy::Fixed => self.initial_delay,
        };

        let delay = if matches!(self.backoff, BackoffStrategy::ExponentialWithJitter)
            && self.jitter_factor > 0.0
        {
            let base = base_delay.min(self.max_delay).as_secs_f64();
            let spread = base * self.jitter_factor.min(1.0);
            let offset = rand::rng().random_range(-spread..=spread);
            Duration::from_secs_f64((base + offset).max(0.0))
        } else {
            base_delay
        };

        // Cap at max_delay
        delay.min(self.max_delay)
    }
}

/// Backoff strategy for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,

    /// Linear increase in delay
    Linear,

    /// Exponential increase in delay (2^n)
    Exponential,

    /// Exponential with random jitter
    ExponentialWithJitter,
}

/// Execute an operation, retrying transport failures per `policy`
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> S3Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = S3Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_transport() || attempt >= policy.max_attempts {
                    return Err(e);
                }

                let delay = policy.calculate_delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after transport failure"
                );
                sleep(delay).await;
            }
        }
    }
}
