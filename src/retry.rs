//! Retry configuration and backoff logic.
//!
//! This module provides the [`RetryConfig`] type and the [`retry_with_backoff`]
//! helper used by [`PubSubManager::publish`](crate::PubSubManager::publish) to
//! ride out transient backend failures.
//!
//! # Retry Strategy
//!
//! - `max_attempts` counts every call, including the first one
//! - After failed attempt `n` the helper sleeps [`RetryConfig::delay_for`]`(n)`
//! - No sleep follows the final failed attempt
//! - Errors for which [`Error::is_retryable`] is false end the loop at once
//! - Each failed attempt is logged at `warn` level

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use std::time::Duration;
use tokio::time::sleep;

use crate::{log_warn, Error, Result};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// `initial_delay * n` after attempt `n` (100ms, 200ms, 300ms, ...).
    Linear,

    /// `initial_delay * multiplier^(n-1)` after attempt `n`, capped at `max_delay`.
    Exponential {
        /// Growth factor applied per attempt.
        multiplier: f32,
        /// Upper bound for a single delay.
        max_delay: Duration,
    },
}

/// Retry configuration for publish.
///
/// # Example
///
/// ```
/// use pubsub_manager::{BackoffStrategy, RetryConfig};
/// use std::time::Duration;
///
/// let retry = RetryConfig {
///     max_attempts: 5,
///     initial_delay: Duration::from_millis(50),
///     strategy: BackoffStrategy::Exponential {
///         multiplier: 2.0,
///         max_delay: Duration::from_secs(2),
///     },
///     jitter: true,
/// };
/// assert_eq!(retry.max_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, the first one included. Must be at least 1.
    pub max_attempts: u32,

    /// Base delay the strategy scales from.
    pub initial_delay: Duration,

    /// Growth of the delay between attempts.
    pub strategy: BackoffStrategy,

    /// Randomize each delay by ±25%.
    pub jitter: bool,
}

impl Default for RetryConfig {
    /// Three attempts with linear 100ms steps and no jitter.
    fn default() -> Self {
        // ---
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            strategy: BackoffStrategy::Linear,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Delay slept after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // ---
        let base = match self.strategy {
            BackoffStrategy::Linear => self.initial_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential {
                multiplier,
                max_delay,
            } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = self.initial_delay.as_secs_f64() * f64::from(multiplier).powi(exponent);

                if !secs.is_finite() || secs >= max_delay.as_secs_f64() {
                    max_delay
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
        };

        if self.jitter {
            apply_jitter(base)
        } else {
            base
        }
    }
}

/// Run `operation` until it succeeds or the attempt budget is spent.
///
/// `operation` receives the 1-based attempt number. `log_prefix` (the
/// manager id) and `operation_name` only feed the log line written for each
/// failed attempt.
///
/// # Returns
///
/// - `Ok(T)` from the first successful attempt
/// - the error itself if it is not retryable
/// - [`Error::RetriesExhausted`] wrapping the last error otherwise
pub(crate) async fn retry_with_backoff<F, Fut, T>(
    retry_config: &RetryConfig,
    log_prefix: &str,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    // ---
    let max_attempts = retry_config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                log_warn!("{log_prefix}: attempt {attempt} failed to {operation_name}: {err}");

                if attempt >= max_attempts {
                    return Err(Error::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }

                sleep(retry_config.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}

/// Apply ±25% jitter to a duration.
///
/// Uses a simple multiplicative jitter: `delay * (0.75 + random(0.0..0.5))`
fn apply_jitter(delay: Duration) -> Duration {
    // ---
    let random_state = RandomState::new();
    let hash = random_state.hash_one(std::time::SystemTime::now());

    let random_factor = (hash % 1000) as f64 / 1000.0;
    let jitter_multiplier = 0.75 + (random_factor * 0.5);

    Duration::from_secs_f64(delay.as_secs_f64() * jitter_multiplier)
}
