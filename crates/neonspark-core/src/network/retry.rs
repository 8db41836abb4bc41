//! Retry logic with exponential backoff and jitter.
//!
//! Calls to the generative model are retried when the upstream reports a
//! transient failure. A server-provided `Retry-After` hint takes precedence
//! over the computed backoff, capped at `max_delay`.

use crate::error::NeonError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Exponential base (typically 2.0 for doubling).
    pub exponential_base: f64,
    /// Whether to add random jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the backoff delay for a given attempt number (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.exponential_base.powi(attempt as i32);
        let capped_secs = (self.base_delay.as_secs_f64() * multiplier)
            .min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            // Jitter factor in [0.5, 1.5) keeps the mean delay unchanged.
            let jitter_factor = rand::rng().random_range(0.5..1.5);
            (capped_secs * jitter_factor).min(self.max_delay.as_secs_f64())
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Give up and return the error.
    Stop,
    /// Retry after the computed backoff.
    Retry,
    /// Retry after the given delay (capped at `max_delay`).
    RetryAfter(Duration),
}

impl RetryDecision {
    /// Default classification for library errors.
    pub fn for_error(err: &NeonError) -> Self {
        match err {
            NeonError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => RetryDecision::RetryAfter(Duration::from_secs(*secs)),
            e if e.is_retryable() => RetryDecision::Retry,
            _ => RetryDecision::Stop,
        }
    }
}

/// Statistics about a retry operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Total delay accumulated.
    pub total_delay: Duration,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
    /// Last error message if failed.
    pub last_error: Option<String>,
}

/// Retry an async operation with exponential backoff.
///
/// `classify` decides per error whether another attempt is made.
/// Returns the final result together with [`RetryStats`].
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
    classify: impl Fn(&E) -> RetryDecision,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut stats = RetryStats::default();
    let mut attempt = 0;

    loop {
        stats.attempts = attempt + 1;

        let err = match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!("Operation succeeded after {} attempts", stats.attempts);
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };

        stats.last_error = Some(err.to_string());

        let delay = match classify(&err) {
            RetryDecision::Stop => {
                debug!("Error is not retryable: {}", err);
                return (Err(err), stats);
            }
            RetryDecision::Retry => config.calculate_delay(attempt),
            RetryDecision::RetryAfter(hint) => hint.min(config.max_delay),
        };

        if stats.attempts >= config.max_attempts {
            warn!(
                "All {} attempts exhausted. Last error: {}",
                config.max_attempts, err
            );
            return (Err(err), stats);
        }

        stats.total_delay += delay;
        warn!(
            "Attempt {}/{} failed: {}. Retrying in {:?}",
            stats.attempts, config.max_attempts, err, delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
