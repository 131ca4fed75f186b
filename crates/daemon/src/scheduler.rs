// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cron engine: job files, hot reload, step interpreter.
//!
//! Jobs are `*.md` files under the cron dir (subdirectories allowed;
//! names are `/`-separated relative paths). A filesystem watcher
//! coalesces change events per file with a 300 ms debounce. Execution
//! is serialized: one job at a time, skipped entirely while the target
//! bridge is busy or the user interacted within the grace window.

use crate::models;
use crate::sessions::SessionManager;
use chrono::Utc;
use notify::{RecursiveMode, Watcher};
use parking_lot::Mutex;
use sb_bridge::{AgentBridge, BridgeError, TurnHooks};
use sb_core::SessionName;
use sb_jobs::{job_name_for, parse_job_file, JobDefinition, Notify, Step};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Per-file debounce for watcher events.
const DEBOUNCE: Duration = Duration::from_millis(300);

/// Read-only probe for the last user interaction.
pub type InteractionProbe = Arc<dyn Fn() -> Option<Instant> + Send + Sync>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to read cron dir {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),
}

#[derive(Debug, Error)]
enum StepError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("no model matching {0:?}")]
    NoModelMatch(String),
}

/// Emitted when a `prompt` step produces a non-empty response.
#[derive(Debug, Clone)]
pub struct JobResponse {
    pub job: String,
    pub notify: Notify,
    pub response: String,
}

/// Dashboard snapshot of one job.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStatus {
    pub name: String,
    pub schedule: String,
    pub enabled: bool,
    pub session: Option<String>,
    pub next_run: Option<String>,
}

struct JobHandle {
    definition: JobDefinition,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    dir: PathBuf,
    default_grace_ms: u64,
    default_session: String,
    sessions: SessionManager,
    interaction: Option<InteractionProbe>,
    jobs: Mutex<HashMap<String, JobHandle>>,
    debounces: Mutex<HashMap<PathBuf, JoinHandle<()>>>,
    /// Held for the duration of one job execution; `try_lock` failure
    /// means another job is running.
    in_flight: tokio::sync::Mutex<()>,
    events: broadcast::Sender<JobResponse>,
    watcher: Mutex<Option<notify::RecommendedWatcher>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        dir: PathBuf,
        default_grace_ms: u64,
        default_session: String,
        sessions: SessionManager,
        interaction: Option<InteractionProbe>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                dir,
                default_grace_ms,
                default_session,
                sessions,
                interaction,
                jobs: Mutex::new(HashMap::new()),
                debounces: Mutex::new(HashMap::new()),
                in_flight: tokio::sync::Mutex::new(()),
                events,
                watcher: Mutex::new(None),
                pump: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobResponse> {
        self.inner.events.subscribe()
    }

    /// Load every `*.md` job and begin watching the directory.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if !self.inner.dir.exists() {
            tracing::warn!(dir = %self.inner.dir.display(), "cron dir missing, scheduler idle");
            return Ok(());
        }

        let mut files = Vec::new();
        collect_md_files(&self.inner.dir, &mut files)
            .map_err(|source| SchedulerError::ReadDir { path: self.inner.dir.clone(), source })?;
        files.sort();

        for path in files {
            self.load_file(&path);
        }

        self.start_watcher()?;
        tracing::info!(
            dir = %self.inner.dir.display(),
            jobs = self.inner.jobs.lock().len(),
            "scheduler started"
        );
        Ok(())
    }

    /// Stop the watcher and all tasks, letting any in-flight execution
    /// finish first.
    pub async fn stop(&self) {
        *self.inner.watcher.lock() = None;
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
        for (_, task) in self.inner.debounces.lock().drain() {
            task.abort();
        }
        // Acquiring the execution lock waits out the current run; while
        // held, any fresh tick fails its try_lock gate and skips.
        let _guard = self.inner.in_flight.lock().await;
        for (_, handle) in self.inner.jobs.lock().drain() {
            if let Some(task) = handle.task {
                task.abort();
            }
        }
        tracing::info!("scheduler stopped");
    }

    /// Loaded job names (for tests and the dashboard).
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.jobs.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn job_statuses(&self) -> Vec<JobStatus> {
        let jobs = self.inner.jobs.lock();
        let mut statuses: Vec<JobStatus> = jobs
            .values()
            .map(|handle| {
                let def = &handle.definition;
                JobStatus {
                    name: def.name.clone(),
                    schedule: def.schedule.as_str().to_string(),
                    enabled: def.enabled,
                    session: def.session.clone(),
                    next_run: def
                        .schedule
                        .next_after(Utc::now())
                        .map(|t| t.to_rfc3339()),
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Run one job now, subject to the execution gate. Ticks call this;
    /// tests may call it directly.
    pub async fn run_job(&self, name: &str) {
        let Some(definition) = self.definition(name) else {
            tracing::warn!(job = name, "tick for unknown job");
            return;
        };

        // Gate 1: user-interaction grace window.
        if let Some(probe) = &self.inner.interaction {
            if let Some(last) = probe() {
                let grace = Duration::from_millis(
                    definition.grace_period_ms.unwrap_or(self.inner.default_grace_ms),
                );
                let elapsed = last.elapsed();
                if elapsed < grace {
                    tracing::info!(
                        job = name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "skipping job inside user-interaction grace window"
                    );
                    return;
                }
            }
        }

        // Gate 2: one job at a time.
        let Ok(_guard) = self.inner.in_flight.try_lock() else {
            tracing::info!(job = name, "skipping job, another job is executing");
            return;
        };

        let session = SessionName::new(
            definition.session.clone().unwrap_or_else(|| self.inner.default_session.clone()),
        );
        let bridge = match self.inner.sessions.get_or_start(&session).await {
            Ok(bridge) => bridge,
            Err(e) => {
                tracing::error!(job = name, session = %session, error = %e, "job session unavailable");
                return;
            }
        };

        // Gate 3: never contend with live traffic.
        if bridge.busy() {
            tracing::info!(job = name, session = %session, "skipping job, bridge is busy");
            return;
        }

        tracing::info!(job = name, session = %session, "running job");
        for step in &definition.steps {
            if let Err(e) = self.run_step(&definition, step, &bridge).await {
                tracing::error!(job = name, error = %e, "job step failed, aborting job");
                return;
            }
        }
    }

    async fn run_step(
        &self,
        definition: &JobDefinition,
        step: &Step,
        bridge: &Arc<dyn AgentBridge>,
    ) -> Result<(), StepError> {
        match step {
            Step::NewSession => {
                bridge.command("new_session", serde_json::Value::Null).await?;
            }
            Step::Compact => {
                bridge.command("compact", serde_json::Value::Null).await?;
            }
            Step::Model(query) => {
                let data = bridge.command("get_available_models", serde_json::Value::Null).await?;
                let catalog = models::parse_models(&data);
                let model = models::match_model(&catalog, query)
                    .ok_or_else(|| StepError::NoModelMatch(query.clone()))?;
                bridge.command("set_model", json!({"modelId": model.id})).await?;
            }
            Step::Prompt => {
                let prompt = format!("[CRON:{}] {}", definition.name, definition.body);
                let response = bridge.send_message(&prompt, TurnHooks::none()).await?;
                if !response.is_empty() {
                    let _ = self.inner.events.send(JobResponse {
                        job: definition.name.clone(),
                        notify: definition.notify.clone(),
                        response,
                    });
                }
            }
            Step::Reload => {
                bridge.command("prompt", json!({"message": "/reload-runtime"})).await?;
            }
        }
        Ok(())
    }

    fn definition(&self, name: &str) -> Option<JobDefinition> {
        self.inner.jobs.lock().get(name).map(|h| h.definition.clone())
    }

    /// Parse one file and (re)install its job. Parse failures are
    /// logged loudly and leave any previous version removed.
    fn load_file(&self, path: &Path) {
        let name = job_name_for(path, Some(&self.inner.dir));
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(job = %name, error = %e, "failed to read job file");
                self.remove_job(&name);
                return;
            }
        };
        match parse_job_file(&content, path, Some(&self.inner.dir)) {
            Ok(definition) => self.install_job(definition),
            Err(e) => {
                tracing::error!(job = %name, error = %e, "invalid job file");
                self.remove_job(&name);
            }
        }
    }

    fn install_job(&self, definition: JobDefinition) {
        let name = definition.name.clone();
        let enabled = definition.enabled;

        // Reserve the slot before spawning the tick task, so the task
        // can never observe a map without its own job.
        {
            let mut jobs = self.inner.jobs.lock();
            if let Some(previous) =
                jobs.insert(name.clone(), JobHandle { definition: definition.clone(), task: None })
            {
                if let Some(task) = previous.task {
                    task.abort();
                }
            }
        }

        if enabled {
            let task = self.spawn_job_task(definition);
            let mut jobs = self.inner.jobs.lock();
            match jobs.get_mut(&name) {
                Some(handle) => handle.task = Some(task),
                // Removed by a concurrent reload between insert and
                // spawn; don't leave an orphan tick loop running.
                None => task.abort(),
            }
        }
        tracing::info!(job = %name, "job installed");
    }

    fn remove_job(&self, name: &str) {
        if let Some(handle) = self.inner.jobs.lock().remove(name) {
            if let Some(task) = handle.task {
                task.abort();
            }
            tracing::info!(job = %name, "job removed");
        }
    }

    /// Tick loop for one job: sleep until the next schedule hit, run,
    /// repeat. The first round uses the definition it was spawned with;
    /// later rounds re-read the map so a reload takes effect and a
    /// removal ends the loop.
    fn spawn_job_task(&self, definition: JobDefinition) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let name = definition.name.clone();
            let mut definition = definition;
            loop {
                let Some(next) = definition.schedule.next_after(Utc::now()) else {
                    tracing::warn!(job = %name, "schedule yields no future run");
                    return;
                };
                let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(delay).await;
                scheduler.run_job(&name).await;
                match scheduler.definition(&name) {
                    Some(current) => definition = current,
                    None => return,
                }
            }
        })
    }

    fn start_watcher(&self) -> Result<(), SchedulerError> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PathBuf>();
        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res {
                for path in event.paths {
                    if path.extension().is_some_and(|ext| ext == "md") {
                        let _ = tx.send(path);
                    }
                }
            }
        })?;
        watcher.watch(&self.inner.dir, RecursiveMode::Recursive)?;
        *self.inner.watcher.lock() = Some(watcher);

        // Debounce pump: coalesce bursts per filename, then reload.
        let scheduler = self.clone();
        let pump = tokio::spawn(async move {
            while let Some(path) = rx.recv().await {
                let mut debounces = scheduler.inner.debounces.lock();
                if let Some(task) = debounces.remove(&path) {
                    task.abort();
                }
                let inner_scheduler = scheduler.clone();
                let debounce_path = path.clone();
                debounces.insert(
                    path,
                    tokio::spawn(async move {
                        tokio::time::sleep(DEBOUNCE).await;
                        inner_scheduler.reload_path(&debounce_path);
                        inner_scheduler.inner.debounces.lock().remove(&debounce_path);
                    }),
                );
            }
        });
        *self.inner.pump.lock() = Some(pump);
        Ok(())
    }

    fn reload_path(&self, path: &Path) {
        if path.exists() {
            self.load_file(path);
        } else {
            let name = job_name_for(path, Some(&self.inner.dir));
            self.remove_job(&name);
        }
    }
}

fn collect_md_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_md_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "md") {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
