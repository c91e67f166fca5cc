// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Sliding-window rate limiting
//!
//! Admission control for the query path and for the downstream generation
//! service. Each limiter keeps an ordered log of admission timestamps inside
//! the trailing window; a request is admitted iff the in-window count is
//! below `max_requests`. On denial the limiter reports the exact wait until
//! the oldest in-window timestamp rolls out, so callers can tell users
//! precisely how long to wait instead of a generic "try again".

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::utils::clock::{Clock, SystemClock};

/// Which limiter denied a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateScope {
    /// Process-wide query volume
    GlobalQuery,
    /// A single user's query volume
    PerUser,
    /// Calls to the downstream generation API
    DownstreamApi,
}

impl fmt::Display for RateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateScope::GlobalQuery => write!(f, "global"),
            RateScope::PerUser => write!(f, "per-user"),
            RateScope::DownstreamApi => write!(f, "downstream-api"),
        }
    }
}

/// A denied admission with the exact wait until capacity frees up
#[derive(Debug, Clone, Error)]
#[error("rate limit exceeded ({scope}): retry after {}s", retry_after.as_secs())]
pub struct RateDenial {
    pub scope: RateScope,
    pub retry_after: Duration,
}

/// Snapshot of a limiter's current window
#[derive(Debug, Clone)]
pub struct LimiterStatus {
    pub name: String,
    pub current_requests: usize,
    pub max_requests: usize,
    pub time_window: Duration,
    pub remaining: usize,
    pub utilization_percent: f64,
}

/// Drop timestamps at or past the trailing edge of the window.
/// The boundary is inclusive so that waiting exactly `retry_after`
/// admits the next request.
fn purge_old(log: &mut VecDeque<SystemTime>, now: SystemTime, window: Duration) {
    let cutoff = now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);
    while let Some(&front) = log.front() {
        if front <= cutoff {
            log.pop_front();
        } else {
            break;
        }
    }
}

fn retry_after_for(oldest: SystemTime, now: SystemTime, window: Duration) -> Duration {
    (oldest + window).duration_since(now).unwrap_or_default()
}

/// Single sliding-window limiter shared by all callers
pub struct RateLimiter {
    name: String,
    max_requests: usize,
    time_window: Duration,
    clock: Arc<dyn Clock>,
    requests: Mutex<VecDeque<SystemTime>>,
}

impl RateLimiter {
    /// # Arguments
    /// * `name` - Limiter name, used in logs
    /// * `max_requests` - Admissions allowed inside the window
    /// * `time_window` - Trailing window length
    pub fn new(name: impl Into<String>, max_requests: usize, time_window: Duration) -> Self {
        Self::with_clock(name, max_requests, time_window, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        max_requests: usize,
        time_window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        info!(
            "Rate limiter '{}' initialized: {} requests per {}s",
            name,
            max_requests,
            time_window.as_secs()
        );
        Self {
            name,
            max_requests,
            time_window,
            clock,
            requests: Mutex::new(VecDeque::new()),
        }
    }

    /// Check admission; on success the current timestamp joins the window
    ///
    /// Returns `(allowed, retry_after)`. `retry_after` is `Some` only on
    /// denial: the exact time until the oldest in-window entry rolls out.
    pub fn is_allowed(&self, identity: &str) -> (bool, Option<Duration>) {
        let now = self.clock.now();
        let mut log = self.requests.lock().expect("rate limiter lock poisoned");

        purge_old(&mut log, now, self.time_window);

        if log.len() < self.max_requests {
            log.push_back(now);
            debug!(
                "Rate limiter '{}': request allowed ({}/{})",
                self.name,
                log.len(),
                self.max_requests
            );
            return (true, None);
        }

        let oldest = *log.front().expect("non-empty window");
        let retry_after = retry_after_for(oldest, now, self.time_window);
        warn!(
            "Rate limiter '{}': request denied for '{}', retry after {:.1}s",
            self.name,
            identity,
            retry_after.as_secs_f64()
        );
        (false, Some(retry_after))
    }

    pub fn status(&self) -> LimiterStatus {
        let now = self.clock.now();
        let mut log = self.requests.lock().expect("rate limiter lock poisoned");
        purge_old(&mut log, now, self.time_window);

        let current = log.len();
        LimiterStatus {
            name: self.name.clone(),
            current_requests: current,
            max_requests: self.max_requests,
            time_window: self.time_window,
            remaining: self.max_requests.saturating_sub(current),
            utilization_percent: if self.max_requests > 0 {
                (current as f64 / self.max_requests as f64) * 100.0
            } else {
                0.0
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Per-identity variant: one timestamp log per user id
pub struct PerUserRateLimiter {
    name: String,
    max_requests: usize,
    time_window: Duration,
    clock: Arc<dyn Clock>,
    user_requests: Mutex<HashMap<String, VecDeque<SystemTime>>>,
}

impl PerUserRateLimiter {
    pub fn new(name: impl Into<String>, max_requests: usize, time_window: Duration) -> Self {
        Self::with_clock(name, max_requests, time_window, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        max_requests: usize,
        time_window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        info!(
            "Per-user rate limiter '{}' initialized: {} requests per {}s",
            name,
            max_requests,
            time_window.as_secs()
        );
        Self {
            name,
            max_requests,
            time_window,
            clock,
            user_requests: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_allowed(&self, user_id: &str) -> (bool, Option<Duration>) {
        let now = self.clock.now();
        let mut users = self.user_requests.lock().expect("rate limiter lock poisoned");
        let log = users.entry(user_id.to_string()).or_default();

        purge_old(log, now, self.time_window);

        if log.len() < self.max_requests {
            log.push_back(now);
            debug!(
                "Rate limiter '{}': request allowed for user '{}' ({}/{})",
                self.name,
                user_id,
                log.len(),
                self.max_requests
            );
            return (true, None);
        }

        let oldest = *log.front().expect("non-empty window");
        let retry_after = retry_after_for(oldest, now, self.time_window);
        warn!(
            "Rate limiter '{}': request denied for user '{}', retry after {:.1}s",
            self.name,
            user_id,
            retry_after.as_secs_f64()
        );
        (false, Some(retry_after))
    }

    pub fn user_status(&self, user_id: &str) -> LimiterStatus {
        let now = self.clock.now();
        let mut users = self.user_requests.lock().expect("rate limiter lock poisoned");

        let current = match users.get_mut(user_id) {
            Some(log) => {
                purge_old(log, now, self.time_window);
                log.len()
            }
            None => 0,
        };

        LimiterStatus {
            name: self.name.clone(),
            current_requests: current,
            max_requests: self.max_requests,
            time_window: self.time_window,
            remaining: self.max_requests.saturating_sub(current),
            utilization_percent: if self.max_requests > 0 {
                (current as f64 / self.max_requests as f64) * 100.0
            } else {
                0.0
            },
        }
    }

    /// Drop identities with no admission newer than `inactive_threshold`.
    /// Bounds memory for identities that stopped querying; not required for
    /// limiting correctness.
    pub fn cleanup_inactive_users(&self, inactive_threshold: Duration) -> usize {
        let now = self.clock.now();
        let cutoff = now
            .checked_sub(inactive_threshold)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut users = self.user_requests.lock().expect("rate limiter lock poisoned");

        let before = users.len();
        users.retain(|_, log| matches!(log.back(), Some(&last) if last > cutoff));
        let removed = before - users.len();

        if removed > 0 {
            info!(
                "Rate limiter '{}': cleaned up {} inactive users",
                self.name, removed
            );
        }
        removed
    }

    pub fn tracked_users(&self) -> usize {
        self.user_requests
            .lock()
            .expect("rate limiter lock poisoned")
            .len()
    }
}

/// Composes the global query limiter and the per-user limiter.
/// Both must admit; the first denial wins and carries its scope.
pub struct RateGuard {
    global: RateLimiter,
    per_user: PerUserRateLimiter,
}

impl RateGuard {
    pub fn new(global: RateLimiter, per_user: PerUserRateLimiter) -> Self {
        Self { global, per_user }
    }

    pub fn check(&self, user_id: &str) -> Result<(), RateDenial> {
        let (allowed, retry_after) = self.global.is_allowed(user_id);
        if !allowed {
            return Err(RateDenial {
                scope: RateScope::GlobalQuery,
                retry_after: retry_after.unwrap_or_default(),
            });
        }

        let (allowed, retry_after) = self.per_user.is_allowed(user_id);
        if !allowed {
            return Err(RateDenial {
                scope: RateScope::PerUser,
                retry_after: retry_after.unwrap_or_default(),
            });
        }

        Ok(())
    }

    pub fn global_status(&self) -> LimiterStatus {
        self.global.status()
    }

    pub fn user_status(&self, user_id: &str) -> LimiterStatus {
        self.per_user.user_status(user_id)
    }

    pub fn cleanup_inactive_users(&self, inactive_threshold: Duration) -> usize {
        self.per_user.cleanup_inactive_users(inactive_threshold)
    }
}
