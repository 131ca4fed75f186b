// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job definition types.

use crate::schedule::Schedule;
use std::path::PathBuf;

/// A parsed cron job.
#[derive(Debug, Clone)]
pub struct JobDefinition {
    /// Path relative to the cron dir, `.md` stripped, `/`-separated.
    pub name: String,
    pub file_path: PathBuf,
    pub schedule: Schedule,
    pub steps: Vec<Step>,
    pub notify: Notify,
    pub enabled: bool,
    /// Per-job override of the user-interaction grace window.
    pub grace_period_ms: Option<u64>,
    /// Session to run against; the daemon default when absent.
    pub session: Option<String>,
    /// Markdown body; the prompt text for `prompt` steps.
    pub body: String,
}

/// One step of a job. Closed set; adding a variant is a type-checked
/// change everywhere steps are interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Start a fresh agent session (`new_session` RPC).
    NewSession,
    /// Compact the agent context (`compact` RPC).
    Compact,
    /// Switch model by case-insensitive substring match.
    Model(String),
    /// Send the job body as a prompt turn.
    Prompt,
    /// Ask the agent to reload its runtime.
    Reload,
}

/// Where job output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notify {
    /// Explicit room/channel.
    Room(String),
    /// Explicitly silenced (`notify: none` or `notify: false`).
    None,
    /// Not specified; inherit the daemon-level default.
    Inherit,
}

impl JobDefinition {
    /// True when any step sends the body as a prompt.
    pub fn has_prompt_step(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, Step::Prompt))
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
