// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory ring of recent log entries.
//!
//! One process-wide buffer feeds the dashboard's `/api/logs` view.
//! Appends are atomic and bounded; readers get a snapshot copy rather
//! than access to the underlying storage.

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Maximum entries retained.
const CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One structured log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO-8601 UTC timestamp.
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    /// Structured key-values attached to the event.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Bounded FIFO of the most recent log entries.
#[derive(Clone)]
pub struct LogBuffer {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self { entries: Arc::new(Mutex::new(VecDeque::with_capacity(CAPACITY))) }
    }

    /// Append an entry, timestamping it now. The oldest entry is evicted
    /// once the buffer is full.
    pub fn push(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        fields: BTreeMap<String, serde_json::Value>,
    ) {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            message: message.into(),
            fields,
        };
        let mut entries = self.entries.lock();
        if entries.len() == CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "logbuf_tests.rs"]
mod tests;
