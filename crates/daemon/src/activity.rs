// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recent-activity feed for the dashboard.

use crate::listener::IncomingMessage;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

const CAPACITY: usize = 50;

/// One inbound message, minus its text (the dashboard shows who spoke
/// where, not what was said).
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub timestamp: String,
    pub platform: String,
    pub channel: String,
    pub sender: String,
}

#[derive(Clone, Default)]
pub struct ActivityFeed {
    entries: Arc<Mutex<VecDeque<ActivityEntry>>>,
}

impl ActivityFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, message: &IncomingMessage) {
        let entry = ActivityEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            platform: message.platform.clone(),
            channel: message.channel.clone(),
            sender: message.sender.clone(),
        };
        let mut entries = self.entries.lock();
        if entries.len() == CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<ActivityEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}
