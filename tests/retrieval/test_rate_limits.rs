// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Sliding-window admission control under a simulated clock

use docqa_node::{ManualClock, PerUserRateLimiter, RateGuard, RateLimiter, RateScope};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_n_plus_one_denied_then_admitted_after_retry_after() {
    let n = 5;
    let clock = Arc::new(ManualClock::fixed());
    let limiter =
        RateLimiter::with_clock("query_limiter", n, Duration::from_secs(60), clock.clone());

    for _ in 0..n {
        let (allowed, retry_after) = limiter.is_allowed("user");
        assert!(allowed);
        assert!(retry_after.is_none());
    }

    let (allowed, retry_after) = limiter.is_allowed("user");
    assert!(!allowed);
    let retry_after = retry_after.unwrap();
    assert!(retry_after > Duration::ZERO);

    // Waiting exactly retry_after frees capacity for the next attempt
    clock.advance(retry_after);
    let (allowed, _) = limiter.is_allowed("user");
    assert!(allowed);
}

#[test]
fn test_retry_after_is_exact_time_until_oldest_rolls_out() {
    let clock = Arc::new(ManualClock::fixed());
    let limiter = RateLimiter::with_clock("test", 2, Duration::from_secs(100), clock.clone());

    limiter.is_allowed("u");
    clock.advance(Duration::from_secs(30));
    limiter.is_allowed("u");
    clock.advance(Duration::from_secs(30));

    // Oldest admission is 60s old inside a 100s window
    let (_, retry_after) = limiter.is_allowed("u");
    assert_eq!(retry_after, Some(Duration::from_secs(40)));
}

#[test]
fn test_denied_attempts_do_not_consume_capacity() {
    let clock = Arc::new(ManualClock::fixed());
    let limiter = RateLimiter::with_clock("test", 1, Duration::from_secs(60), clock.clone());

    assert!(limiter.is_allowed("u").0);
    for _ in 0..10 {
        assert!(!limiter.is_allowed("u").0);
    }

    clock.advance(Duration::from_secs(60));
    assert!(limiter.is_allowed("u").0);
}

#[test]
fn test_per_user_windows_are_independent() {
    let clock = Arc::new(ManualClock::fixed());
    let limiter = PerUserRateLimiter::with_clock(
        "user_query_limiter",
        3,
        Duration::from_secs(3600),
        clock.clone(),
    );

    for _ in 0..3 {
        assert!(limiter.is_allowed("alice").0);
    }
    assert!(!limiter.is_allowed("alice").0);

    for _ in 0..3 {
        assert!(limiter.is_allowed("bob").0);
    }
    assert!(!limiter.is_allowed("bob").0);
}

#[test]
fn test_inactive_user_sweep_bounds_tracked_state() {
    let clock = Arc::new(ManualClock::fixed());
    let limiter =
        PerUserRateLimiter::with_clock("user_query_limiter", 5, Duration::from_secs(60), clock.clone());

    for i in 0..10 {
        limiter.is_allowed(&format!("user-{i}"));
    }
    assert_eq!(limiter.tracked_users(), 10);

    clock.advance(Duration::from_secs(7200));
    limiter.is_allowed("fresh-user");

    let removed = limiter.cleanup_inactive_users(Duration::from_secs(3600));
    assert_eq!(removed, 10);
    assert_eq!(limiter.tracked_users(), 1);
}

#[test]
fn test_guard_requires_both_limiters_to_admit() {
    let clock = Arc::new(ManualClock::fixed());
    let guard = RateGuard::new(
        RateLimiter::with_clock("query_limiter", 100, Duration::from_secs(60), clock.clone()),
        PerUserRateLimiter::with_clock(
            "user_query_limiter",
            2,
            Duration::from_secs(3600),
            clock.clone(),
        ),
    );

    assert!(guard.check("carol").is_ok());
    assert!(guard.check("carol").is_ok());

    let denial = guard.check("carol").unwrap_err();
    assert_eq!(denial.scope, RateScope::PerUser);
    assert!(denial.retry_after > Duration::ZERO);

    // Global capacity was consumed but other users still pass
    assert!(guard.check("dave").is_ok());
}

#[test]
fn test_guard_global_denial_takes_precedence() {
    let clock = Arc::new(ManualClock::fixed());
    let guard = RateGuard::new(
        RateLimiter::with_clock("query_limiter", 1, Duration::from_secs(60), clock.clone()),
        PerUserRateLimiter::with_clock(
            "user_query_limiter",
            1,
            Duration::from_secs(3600),
            clock.clone(),
        ),
    );

    assert!(guard.check("erin").is_ok());

    // Both limits are exhausted; the global denial is reported first
    let denial = guard.check("erin").unwrap_err();
    assert_eq!(denial.scope, RateScope::GlobalQuery);
}

#[test]
fn test_status_remaining_tracks_window() {
    let clock = Arc::new(ManualClock::fixed());
    let limiter = RateLimiter::with_clock("test", 4, Duration::from_secs(60), clock.clone());

    limiter.is_allowed("u");
    limiter.is_allowed("u");
    assert_eq!(limiter.status().remaining, 2);

    clock.advance(Duration::from_secs(61));
    assert_eq!(limiter.status().remaining, 4);
}
