// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Bounded exponential-backoff retries for the downstream generation call
//!
//! Wraps a fallible async operation and retries it up to `max_retries`
//! additional times, sleeping `initial_delay * backoff_factor^attempt`
//! between attempts (clamped to `max_delay`). Intermediate failures are
//! logged but never surfaced; callers only ever see the success value or a
//! single terminal error wrapping the last underlying cause.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

/// Terminal failure after all retries are spent
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    #[error("operation failed after {attempts} retries: {source}")]
    Exhausted {
        /// Number of retries performed (not counting the first attempt)
        attempts: usize,
        #[source]
        source: E,
    },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// The last underlying error
    pub fn last_cause(&self) -> &E {
        match self {
            RetryError::Exhausted { source, .. } => source,
        }
    }
}

/// Retry configuration for a protected call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    /// Adds up to 10% random extra delay per sleep when enabled. Off by
    /// default to keep backoff timing exact.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            initial_delay,
            backoff_factor,
            ..Self::default()
        }
    }

    /// Delay before the retry following failed attempt `attempt` (0-based)
    fn delay_for(&self, attempt: usize) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let mut delay = base.min(self.max_delay.as_secs_f64());
        if self.jitter && delay > 0.0 {
            delay *= 1.0 + rand::thread_rng().gen_range(0.0..0.1);
        }
        Duration::from_secs_f64(delay)
    }

    /// Run `op`, retrying failed attempts until one succeeds or the retry
    /// allowance is spent
    ///
    /// `op` is invoked fresh for every attempt. The final verdict is either
    /// the success value or `RetryError::Exhausted` wrapping the last error.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let mut attempt = 0usize;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.max_retries {
                        error!(
                            "Operation failed after {} retries: {}",
                            self.max_retries, e
                        );
                        return Err(RetryError::Exhausted {
                            attempts: self.max_retries,
                            source: e,
                        });
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:.1}s",
                        attempt + 1,
                        self.max_retries,
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
