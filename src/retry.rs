//! Bounded retry with exponential backoff.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

const JITTER_FACTOR: f64 = 0.5;

/// Something that can wait. Production code sleeps on the tokio timer;
/// tests record the requested delays and return immediately.
#[allow(async_fn_in_trait)]
pub trait Sleeper {
    /// Wait for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Value produced by a retried operation plus how many attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    /// Operation result
    pub value: T,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

impl<T> Retried<T> {
    /// Attempts beyond the first.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Retry policy: `max_retries` further attempts after the first, waiting an
/// exponentially growing delay between attempts. Errors that are not
/// [`Error::is_retryable`] end the loop immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from config.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.saturating_add(1)
    }

    /// Fresh backoff schedule.
    ///
    /// Attempts are bounded by count, not by wall time, so the elapsed-time
    /// cap is disabled.
    pub fn backoff(&self) -> ExponentialBackoff {
        let randomization = if self.config.jitter {
            JITTER_FACTOR
        } else {
            0.0
        };

        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_backoff())
            .with_max_interval(self.config.max_backoff())
            .with_multiplier(self.config.multiplier)
            .with_randomization_factor(randomization)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or runs out of attempts. Exactly one sleep separates consecutive
    /// attempts; nothing sleeps after the last one.
    pub async fn run<T, F, Fut, S>(&self, sleeper: &S, what: &str, mut operation: F) -> Result<Retried<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        S: Sleeper,
    {
        let max_attempts = self.max_attempts();
        let mut backoff = self.backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "{} succeeded after retry", what);
                    }
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                    });
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                warn!(code = error.code(), "{} failed permanently: {}", what, error);
                return Err(error);
            }

            if attempt >= max_attempts {
                return Err(Error::RetryExhausted {
                    attempts: attempt,
                    message: format!("{} failed: {}", what, error),
                    last_error: Some(Box::new(error)),
                });
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or_else(|| self.config.max_backoff());
            warn!(
                attempt,
                max_attempts,
                "{} failed: {}; retrying in {}",
                what,
                error,
                humantime::format_duration(delay)
            );
            sleeper.sleep(delay).await;
        }
    }
}
