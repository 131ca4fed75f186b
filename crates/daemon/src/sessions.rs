// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session manager: a named, lazily-started pool of bridges.
//!
//! State machine per session: `idle → starting → running → stopping →
//! idle`, plus `running → idle` on an unsolicited child exit. Concurrent
//! `get_or_start` calls for a starting session suspend on a one-shot
//! notification rather than polling, with a 30 s deadline.

use parking_lot::Mutex;
use sb_bridge::{AgentBridge, BridgeError};
use sb_core::config::{Config, SessionConfig};
use sb_core::SessionName;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Deadline for waiting on another caller's in-progress start (or an
/// in-progress stop). The start itself is not timed.
const START_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} did not start within 30s")]
    Timeout(SessionName),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Fan-out from the manager. `Exited` fires only for unsolicited child
/// exits, never for intentional stops.
#[derive(Clone)]
pub enum SessionEvent {
    Started { name: SessionName, bridge: Arc<dyn AgentBridge> },
    Exited { name: SessionName },
}

/// Seam for constructing bridges, injected so tests can supply fakes.
pub trait BridgeFactory: Send + Sync {
    fn create(&self, name: &str, config: &SessionConfig) -> Arc<dyn AgentBridge>;
}

/// Factory spawning real agent child processes.
pub struct ProcessBridgeFactory;

impl BridgeFactory for ProcessBridgeFactory {
    fn create(&self, _name: &str, config: &SessionConfig) -> Arc<dyn AgentBridge> {
        let command = config.command.clone().unwrap_or_default();
        Arc::new(sb_bridge::Bridge::new(command, config.workdir.clone()))
    }
}

struct SessionEntry {
    state: SessionState,
    bridge: Option<Arc<dyn AgentBridge>>,
    /// Present while `starting`; flips true when the start attempt
    /// finishes (either way).
    ready: Option<watch::Receiver<bool>>,
    exit_task: Option<JoinHandle<()>>,
    idle_task: Option<JoinHandle<()>>,
    last_activity: Instant,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            bridge: None,
            ready: None,
            exit_task: None,
            idle_task: None,
            last_activity: Instant::now(),
        }
    }
}

struct Inner {
    config: Arc<Config>,
    factory: Arc<dyn BridgeFactory>,
    entries: Mutex<HashMap<String, SessionEntry>>,
    events: broadcast::Sender<SessionEvent>,
}

/// Named pool of bridges with routing and idle shutdown.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(config: Arc<Config>, factory: Arc<dyn BridgeFactory>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self { inner: Arc::new(Inner { config, factory, entries: Mutex::new(HashMap::new()), events }) }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Resolve `(platform, channel)` through the routing rules; first
    /// rule whose specified predicates all match wins, else the default.
    pub fn resolve(&self, platform: &str, channel: &str) -> SessionName {
        let sessions = &self.inner.config.sessions;
        for rule in &sessions.routes {
            if rule.matches(platform, channel) {
                return SessionName::new(rule.session.clone());
            }
        }
        SessionName::new(sessions.default.clone())
    }

    pub fn state(&self, name: &str) -> SessionState {
        self.inner
            .entries
            .lock()
            .get(name)
            .map(|e| e.state)
            .unwrap_or(SessionState::Idle)
    }

    /// Record user traffic on a session: resets the idle countdown.
    pub fn record_activity(&self, name: &str) {
        if let Some(entry) = self.inner.entries.lock().get_mut(name) {
            entry.last_activity = Instant::now();
        }
    }

    /// Names of sessions currently running.
    pub fn running_sessions(&self) -> Vec<String> {
        self.inner
            .entries
            .lock()
            .iter()
            .filter(|(_, e)| e.state == SessionState::Running)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Bridge for a running session, if any.
    pub fn bridge(&self, name: &str) -> Option<Arc<dyn AgentBridge>> {
        let entries = self.inner.entries.lock();
        let entry = entries.get(name)?;
        if entry.state == SessionState::Running {
            entry.bridge.clone()
        } else {
            None
        }
    }

    /// Get the session's bridge, starting it if necessary. A caller
    /// that finds the session mid-start (or mid-stop) suspends until
    /// the other task finishes, bounded by the 30 s deadline. The
    /// deadline covers only that wait: a caller that becomes the
    /// starter itself runs `start_session` to completion untimed, so
    /// its waiters are always woken.
    pub async fn get_or_start(
        &self,
        name: &SessionName,
    ) -> Result<Arc<dyn AgentBridge>, SessionError> {
        enum Plan {
            Use(Arc<dyn AgentBridge>),
            Wait(watch::Receiver<bool>),
            Retry,
            Start(watch::Sender<bool>),
        }

        let deadline = tokio::time::Instant::now() + START_DEADLINE;
        loop {
            let plan = {
                let mut entries = self.inner.entries.lock();
                let entry = entries.entry(name.as_str().to_string()).or_insert_with(SessionEntry::new);
                match entry.state {
                    SessionState::Running => {
                        entry.last_activity = Instant::now();
                        match entry.bridge.clone() {
                            Some(bridge) => Plan::Use(bridge),
                            // Invariant breach; treat as idle.
                            None => Plan::Retry,
                        }
                    }
                    SessionState::Starting => match entry.ready.clone() {
                        Some(rx) => Plan::Wait(rx),
                        None => Plan::Retry,
                    },
                    SessionState::Stopping => Plan::Retry,
                    SessionState::Idle => {
                        let (tx, rx) = watch::channel(false);
                        entry.state = SessionState::Starting;
                        entry.ready = Some(rx);
                        Plan::Start(tx)
                    }
                }
            };

            match plan {
                Plan::Use(bridge) => return Ok(bridge),
                Plan::Wait(mut rx) => {
                    let vanished = match tokio::time::timeout_at(
                        deadline,
                        rx.wait_for(|done| *done),
                    )
                    .await
                    {
                        Ok(Ok(_)) => false,
                        Ok(Err(_)) => true,
                        Err(_) => return Err(SessionError::Timeout(name.clone())),
                    };
                    if vanished {
                        // Starter vanished without signalling; pause
                        // before re-checking so a wedged entry cannot
                        // busy-loop.
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        if tokio::time::Instant::now() >= deadline {
                            return Err(SessionError::Timeout(name.clone()));
                        }
                    }
                }
                Plan::Retry => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(SessionError::Timeout(name.clone()));
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Plan::Start(tx) => {
                    // Runs untimed. Wake concurrent waiters whether we
                    // succeeded or not.
                    let result = self.start_session(name).await;
                    let _ = tx.send(true);
                    return result;
                }
            }
        }
    }

    /// Start the bridge for a session already flipped to `starting`.
    async fn start_session(&self, name: &SessionName) -> Result<Arc<dyn AgentBridge>, SessionError> {
        let session_config = self.inner.config.session_config(name.as_str());
        let bridge = self.inner.factory.create(name.as_str(), &session_config);

        // Install the bridge before start() so an immediate child exit
        // has an entry to clear.
        {
            let mut entries = self.inner.entries.lock();
            if let Some(entry) = entries.get_mut(name.as_str()) {
                entry.bridge = Some(Arc::clone(&bridge));
            }
        }

        if let Err(e) = bridge.start().await {
            let mut entries = self.inner.entries.lock();
            if let Some(entry) = entries.get_mut(name.as_str()) {
                entry.state = SessionState::Idle;
                entry.bridge = None;
                entry.ready = None;
            }
            return Err(e.into());
        }

        let exit_task = self.spawn_exit_watcher(name.clone(), Arc::clone(&bridge));
        let idle_task = self.spawn_idle_timer(name.clone(), session_config.idle_timeout_minutes);

        {
            let mut entries = self.inner.entries.lock();
            if let Some(entry) = entries.get_mut(name.as_str()) {
                entry.state = SessionState::Running;
                entry.ready = None;
                entry.last_activity = Instant::now();
                entry.exit_task = Some(exit_task);
                entry.idle_task = idle_task;
            }
        }

        tracing::info!(session = %name, "session started");
        let _ = self
            .inner
            .events
            .send(SessionEvent::Started { name: name.clone(), bridge: Arc::clone(&bridge) });
        Ok(bridge)
    }

    fn spawn_exit_watcher(&self, name: SessionName, bridge: Arc<dyn AgentBridge>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            bridge.wait_exited().await;
            manager.handle_unsolicited_exit(&name);
        })
    }

    fn handle_unsolicited_exit(&self, name: &SessionName) {
        let notify = {
            let mut entries = self.inner.entries.lock();
            match entries.get_mut(name.as_str()) {
                Some(entry) if entry.state == SessionState::Running => {
                    entry.state = SessionState::Idle;
                    entry.bridge = None;
                    if let Some(task) = entry.idle_task.take() {
                        task.abort();
                    }
                    entry.exit_task = None;
                    true
                }
                _ => false,
            }
        };
        if notify {
            tracing::error!(session = %name, "agent exited unexpectedly");
            let _ = self.inner.events.send(SessionEvent::Exited { name: name.clone() });
        }
    }

    fn spawn_idle_timer(&self, name: SessionName, timeout_minutes: u64) -> Option<JoinHandle<()>> {
        if timeout_minutes == 0 {
            return None;
        }
        let interval = idle_interval(timeout_minutes);
        let manager = self.clone();
        Some(tokio::spawn(async move {
            let mut remaining = interval;
            loop {
                tokio::time::sleep(remaining).await;
                let (elapsed, busy) = {
                    let entries = manager.inner.entries.lock();
                    let Some(entry) = entries.get(name.as_str()) else { return };
                    if entry.state != SessionState::Running {
                        return;
                    }
                    let busy = entry.bridge.as_ref().map(|b| b.busy()).unwrap_or(false);
                    (entry.last_activity.elapsed(), busy)
                };
                if elapsed < interval {
                    // Activity since the last arm; sleep out the rest.
                    remaining = interval - elapsed;
                    continue;
                }
                if busy {
                    remaining = interval;
                    continue;
                }
                tracing::info!(session = %name, "idle timeout, stopping session");
                if let Err(e) = manager.stop_session(&name).await {
                    tracing::warn!(session = %name, error = %e, "idle stop failed");
                }
                return;
            }
        }))
    }

    /// Stop a session. Idempotent for idle/stopping sessions. The exit
    /// watcher is detached first so an intentional stop does not count
    /// as an unsolicited exit.
    pub async fn stop_session(&self, name: &SessionName) -> Result<(), SessionError> {
        let bridge = {
            let mut entries = self.inner.entries.lock();
            let Some(entry) = entries.get_mut(name.as_str()) else { return Ok(()) };
            match entry.state {
                SessionState::Idle | SessionState::Stopping => return Ok(()),
                SessionState::Starting => return Ok(()),
                SessionState::Running => {}
            }
            entry.state = SessionState::Stopping;
            if let Some(task) = entry.exit_task.take() {
                task.abort();
            }
            if let Some(task) = entry.idle_task.take() {
                task.abort();
            }
            entry.bridge.clone()
        };

        if let Some(bridge) = bridge {
            if let Err(e) = bridge.stop().await {
                tracing::warn!(session = %name, error = %e, "bridge stop failed");
            }
        }

        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get_mut(name.as_str()) {
            entry.state = SessionState::Idle;
            entry.bridge = None;
        }
        tracing::info!(session = %name, "session stopped");
        Ok(())
    }

    /// Stop everything, concurrently. Per-session failures are logged,
    /// never raised.
    pub async fn stop_all(&self) {
        let names: Vec<String> = self.inner.entries.lock().keys().cloned().collect();
        let stops = names.into_iter().map(|name| {
            let manager = self.clone();
            async move {
                let name = SessionName::new(name);
                if let Err(e) = manager.stop_session(&name).await {
                    tracing::warn!(session = %name, error = %e, "stop_all: session stop failed");
                }
            }
        });
        futures_util::future::join_all(stops).await;
    }
}

/// Milliseconds per idle-timeout "minute". Overridable via
/// `SB_IDLE_MINUTE_MS` so tests can run the timer at speed.
fn idle_interval(minutes: u64) -> Duration {
    let minute_ms = std::env::var("SB_IDLE_MINUTE_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(60_000);
    Duration::from_millis(minutes.saturating_mul(minute_ms))
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
