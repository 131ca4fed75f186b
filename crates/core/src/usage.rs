// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Usage-event accounting.
//!
//! Token and cost figures reported by the agent child are kept in a
//! bounded in-memory ring for the dashboard, with an optional
//! append-only JSONL mirror so history survives restarts. Loading the
//! mirror applies a retention window by timestamp.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Ring capacity.
const CAPACITY: usize = 1_000;

/// Context shrinking below this fraction of its previous size counts as
/// a compaction.
const COMPACTION_RATIO: f64 = 0.7;

/// One usage sample derived from agent session stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub context_size: u64,
    pub cost: f64,
    /// True when this sample recorded a context compaction.
    pub compaction: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

/// True iff `new` context size indicates a compaction relative to
/// `previous`. Equality at the threshold does not trigger.
pub fn detect_compaction(previous: u64, new: u64) -> bool {
    (new as f64) < COMPACTION_RATIO * (previous as f64)
}

/// Bounded ring of usage events with an optional JSONL mirror.
#[derive(Clone)]
pub struct UsageLog {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    events: VecDeque<UsageEvent>,
    mirror: Option<PathBuf>,
}

impl UsageLog {
    pub fn new(mirror: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                events: VecDeque::with_capacity(CAPACITY),
                mirror,
            })),
        }
    }

    /// Load mirrored history, keeping only events newer than
    /// `now_ms - retention_ms`. Unparseable lines are skipped.
    pub fn load(mirror: PathBuf, now_ms: u64, retention_ms: u64) -> Self {
        let cutoff = now_ms.saturating_sub(retention_ms);
        let mut events = VecDeque::with_capacity(CAPACITY);
        if let Ok(file) = std::fs::File::open(&mirror) {
            for line in BufReader::new(file).lines().map_while(Result::ok) {
                let Ok(event) = serde_json::from_str::<UsageEvent>(&line) else {
                    continue;
                };
                if event.timestamp_ms < cutoff {
                    continue;
                }
                if events.len() == CAPACITY {
                    events.pop_front();
                }
                events.push_back(event);
            }
        }
        Self { inner: Arc::new(Mutex::new(Inner { events, mirror: Some(mirror) })) }
    }

    /// Record an event, mirroring it to the JSONL file when configured.
    /// Mirror failures are logged and do not affect the ring.
    pub fn record(&self, event: UsageEvent) {
        let mut inner = self.inner.lock();
        if let Some(path) = inner.mirror.clone() {
            if let Err(e) = append_jsonl(&path, &event) {
                tracing::warn!(path = %path.display(), error = %e, "usage mirror write failed");
            }
        }
        if inner.events.len() == CAPACITY {
            inner.events.pop_front();
        }
        inner.events.push_back(event);
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<UsageEvent> {
        self.inner.lock().events.iter().cloned().collect()
    }

    /// Aggregate events with `timestamp_ms >= since_ms`.
    pub fn totals_since(&self, since_ms: u64) -> UsageTotals {
        let inner = self.inner.lock();
        let mut totals = UsageTotals::default();
        for event in inner.events.iter().filter(|e| e.timestamp_ms >= since_ms) {
            totals.events += 1;
            totals.input_tokens += event.input_tokens;
            totals.output_tokens += event.output_tokens;
            totals.cost += event.cost;
            if event.compaction {
                totals.compactions += 1;
            }
        }
        totals
    }

    /// Context size of the most recent event, if any.
    pub fn last_context_size(&self) -> Option<u64> {
        self.inner.lock().events.back().map(|e| e.context_size)
    }
}

/// Summed usage over a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageTotals {
    pub events: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub compactions: u64,
}

fn append_jsonl(path: &Path, event: &UsageEvent) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(event).map_err(std::io::Error::other)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
#[path = "usage_tests.rs"]
mod tests;
