// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Standard 5-field cron schedule.
//!
//! Job files use the classic `minute hour day-of-month month day-of-week`
//! grammar. The `cron` crate wants a seconds field, so a `0` is prefixed
//! internally; `Display` always renders the original 5-field string.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A validated 5-field cron expression.
#[derive(Debug, Clone)]
pub struct Schedule {
    source: String,
    inner: cron::Schedule,
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("schedule must have 5 fields (minute hour day month weekday), got {0}")]
    FieldCount(usize),

    #[error("invalid cron expression {expr:?}: {reason}")]
    Invalid { expr: String, reason: String },
}

impl Schedule {
    /// Parse and validate a 5-field cron expression.
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let trimmed = expr.trim();
        let fields = trimmed.split_whitespace().count();
        if fields != 5 {
            return Err(ScheduleError::FieldCount(fields));
        }
        let with_seconds = format!("0 {trimmed}");
        let inner = cron::Schedule::from_str(&with_seconds).map_err(|e| {
            ScheduleError::Invalid { expr: trimmed.to_string(), reason: e.to_string() }
        })?;
        Ok(Self { source: trimmed.to_string(), inner })
    }

    /// The original 5-field expression.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Next fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(&after).next()
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl PartialEq for Schedule {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Schedule {}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
