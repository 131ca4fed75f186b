// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-sender sliding-window rate limiter.
//!
//! A key is allowed at most `max` accepted requests in any trailing
//! `window`. Only accepted requests are recorded, so the limit tracks
//! true throughput rather than attempt rate: a denied burst does not
//! extend its own penalty.

use crate::clock::Clock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_MAX: usize = 10;

pub struct RateLimiter<C: Clock> {
    clock: C,
    window: Duration,
    max: usize,
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl<C: Clock> RateLimiter<C> {
    /// Limiter with the daemon default of 10 requests per 60 seconds.
    pub fn new(clock: C) -> Self {
        Self::with_limits(clock, DEFAULT_WINDOW, DEFAULT_MAX)
    }

    pub fn with_limits(clock: C, window: Duration, max: usize) -> Self {
        Self { clock, window, max, buckets: Mutex::new(HashMap::new()) }
    }

    /// Check whether `key` may proceed. Accepts and records the request
    /// when under the limit; denies without recording otherwise.
    pub fn check(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_default();
        while let Some(front) = bucket.front() {
            if now.duration_since(*front) >= self.window {
                bucket.pop_front();
            } else {
                break;
            }
        }
        if bucket.len() >= self.max {
            return false;
        }
        bucket.push_back(now);
        true
    }

    /// Accepted requests currently inside the window for `key`.
    pub fn current(&self, key: &str) -> usize {
        let now = self.clock.now();
        let buckets = self.buckets.lock();
        match buckets.get(key) {
            Some(bucket) => {
                bucket.iter().filter(|t| now.duration_since(**t) < self.window).count()
            }
            None => 0,
        }
    }
}

#[cfg(test)]
#[path = "ratelimit_tests.rs"]
mod tests;
