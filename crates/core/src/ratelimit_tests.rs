// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::FakeClock;

#[test]
fn allows_up_to_max() {
    let limiter = RateLimiter::new(FakeClock::new());
    for _ in 0..10 {
        assert!(limiter.check("@w:a"));
    }
    assert!(!limiter.check("@w:a"));
}

#[test]
fn eleventh_within_window_denied() {
    let clock = FakeClock::new();
    let limiter = RateLimiter::new(clock.clone());
    for _ in 0..10 {
        assert!(limiter.check("@w:a"));
        clock.advance(Duration::from_millis(400));
    }
    // Still inside the 60s window.
    assert!(!limiter.check("@w:a"));
}

#[test]
fn window_slides() {
    let clock = FakeClock::new();
    let limiter = RateLimiter::new(clock.clone());
    for _ in 0..10 {
        assert!(limiter.check("@w:a"));
    }
    assert!(!limiter.check("@w:a"));

    clock.advance(Duration::from_secs(60));
    assert!(limiter.check("@w:a"));
}

#[test]
fn denied_attempts_not_recorded() {
    let clock = FakeClock::new();
    let limiter = RateLimiter::new(clock.clone());
    for _ in 0..10 {
        assert!(limiter.check("@w:a"));
    }
    // Hammer while limited; none of these should extend the window.
    for _ in 0..50 {
        assert!(!limiter.check("@w:a"));
    }
    assert_eq!(limiter.current("@w:a"), 10);
    clock.advance(Duration::from_secs(60));
    assert!(limiter.check("@w:a"));
}

#[test]
fn keys_are_independent() {
    let limiter = RateLimiter::new(FakeClock::new());
    for _ in 0..10 {
        assert!(limiter.check("@a:x"));
    }
    assert!(!limiter.check("@a:x"));
    assert!(limiter.check("@b:y"));
}

#[test]
fn custom_limits() {
    let clock = FakeClock::new();
    let limiter = RateLimiter::with_limits(clock, Duration::from_secs(1), 2);
    assert!(limiter.check("k"));
    assert!(limiter.check("k"));
    assert!(!limiter.check("k"));
}
