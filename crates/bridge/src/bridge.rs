// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child-process supervisor for one agent.
//!
//! A `Bridge` owns a single agent child and multiplexes three concerns
//! over its line-delimited JSON stdio: id-matched request/response RPC,
//! a FIFO queue of turn-scoped text waiters resolved by `agent_end`,
//! and an ordered verbatim event stream for subscribers.
//!
//! Ordering invariants: stdin writes are serialized behind one async
//! mutex (a turn's queue position always matches its write order), and
//! `agent_end` resolves the queue head. Subscribers each own a bounded
//! channel; publishing never blocks, and events are dropped newest-first
//! per subscriber on overflow, with a dropped counter.

use crate::framer::LineFramer;
use crate::protocol::{rpc_envelope, AgentEvent, AssistantMessageEvent};
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

/// Capacity of each subscriber's event channel.
const SUBSCRIBER_QUEUE: usize = 256;

/// SIGTERM → SIGKILL window on `stop`.
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("bridge not started")]
    NotStarted,

    #[error("bridge already started")]
    AlreadyStarted,

    #[error("failed to spawn agent: {0}")]
    SpawnFailed(String),

    #[error("agent exited")]
    ChildExited,

    #[error("bridge stopped")]
    Stopped,

    #[error("write to agent failed: {0}")]
    WriteFailed(String),

    #[error("agent rpc failed: {0}")]
    Rpc(String),
}

/// Bridge lifecycle. A bridge is single-use: once exited it cannot be
/// restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Running,
    Exited,
}

/// A tool invocation announced by the child.
#[derive(Debug, Clone)]
pub struct ToolStart {
    pub tool_name: String,
    pub args: Value,
}

/// Optional per-turn callbacks for intermediate output.
///
/// Hooks fire on the bridge's reader task and must not block; typical
/// implementations hand off to a channel or `tokio::spawn`.
#[derive(Clone, Default)]
pub struct TurnHooks {
    pub on_tool_start: Option<Arc<dyn Fn(&ToolStart) + Send + Sync>>,
    pub on_text: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl TurnHooks {
    /// No callbacks.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Seam for the daemon and tests: everything the policy layer needs
/// from a bridge.
#[async_trait]
pub trait AgentBridge: Send + Sync {
    async fn start(&self) -> Result<(), BridgeError>;

    /// Enqueue one turn. Exactly one text response (or one terminal
    /// error) per accepted call, resolved in enqueue order.
    async fn send_message(&self, text: &str, hooks: TurnHooks) -> Result<String, BridgeError>;

    /// Deliver text into the in-flight turn. Fire-and-forget: no waiter
    /// is enqueued and the caller does not block.
    fn steer(&self, text: &str);

    /// One-shot RPC resolved by the matching `response` event.
    async fn command(&self, rpc_type: &str, params: Value) -> Result<Value, BridgeError>;

    /// SIGTERM, then SIGKILL after 5 s. Rejects all outstanding work.
    async fn stop(&self) -> Result<(), BridgeError>;

    /// True iff a turn is in flight (the back-pressure signal).
    fn busy(&self) -> bool;

    fn state(&self) -> Lifecycle;

    /// Ordered verbatim event stream. Slow receivers lose newest events
    /// rather than blocking the bridge.
    fn subscribe(&self) -> mpsc::Receiver<Value>;

    /// Resolves once the child has exited (for any reason).
    async fn wait_exited(&self);
}

/// Supervisor for one agent child process.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

struct Turn {
    tx: oneshot::Sender<Result<String, BridgeError>>,
    hooks: TurnHooks,
}

struct Subscriber {
    tx: mpsc::Sender<Value>,
    dropped: u64,
}

struct Inner {
    command: String,
    workdir: Option<PathBuf>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Result<Value, BridgeError>>>>,
    turns: Mutex<VecDeque<Turn>>,
    accumulator: Mutex<String>,
    lifecycle: Mutex<Lifecycle>,
    subscribers: Mutex<Vec<Subscriber>>,
    pid: Mutex<Option<i32>>,
    exited_tx: watch::Sender<bool>,
    exited_rx: watch::Receiver<bool>,
}

impl Bridge {
    /// Create a bridge for `command`, run through `sh -c` in `workdir`.
    pub fn new(command: impl Into<String>, workdir: Option<PathBuf>) -> Self {
        let (exited_tx, exited_rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                command: command.into(),
                workdir,
                stdin: tokio::sync::Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                turns: Mutex::new(VecDeque::new()),
                accumulator: Mutex::new(String::new()),
                lifecycle: Mutex::new(Lifecycle::Idle),
                subscribers: Mutex::new(Vec::new()),
                pid: Mutex::new(None),
                exited_tx,
                exited_rx,
            }),
        }
    }

    fn ensure_running(&self) -> Result<(), BridgeError> {
        match *self.inner.lifecycle.lock() {
            Lifecycle::Running => Ok(()),
            Lifecycle::Idle => Err(BridgeError::NotStarted),
            Lifecycle::Exited => Err(BridgeError::ChildExited),
        }
    }
}

#[async_trait]
impl AgentBridge for Bridge {
    async fn start(&self) -> Result<(), BridgeError> {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Idle => *lifecycle = Lifecycle::Running,
                Lifecycle::Running => return Err(BridgeError::AlreadyStarted),
                Lifecycle::Exited => return Err(BridgeError::ChildExited),
            }
        }

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&self.inner.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.inner.workdir {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                *self.inner.lifecycle.lock() = Lifecycle::Idle;
                return Err(BridgeError::SpawnFailed(e.to_string()));
            }
        };

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        *self.inner.pid.lock() = child.id().map(|pid| pid as i32);
        *self.inner.stdin.lock().await = stdin;

        tracing::info!(pid = ?child.id(), command = %self.inner.command, "agent spawned");

        // Reader: frame stdout chunks into JSON events and dispatch.
        if let Some(mut stdout) = stdout {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                let mut framer = LineFramer::new();
                let mut chunk = vec![0u8; 8192];
                loop {
                    match stdout.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            for value in framer.push(&chunk[..n]) {
                                inner.dispatch(value);
                            }
                        }
                    }
                }
            });
        }

        // Stderr is logged but never affects control flow.
        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::error!(agent_stderr = %line);
                }
            });
        }

        // Exit watcher: one terminal error for everything outstanding.
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let status = child.wait().await;
            let code = status.as_ref().ok().and_then(|s| s.code());
            tracing::info!(exit_code = ?code, "agent exited");
            inner.handle_exit();
        });

        Ok(())
    }

    async fn send_message(&self, text: &str, hooks: TurnHooks) -> Result<String, BridgeError> {
        self.ensure_running()?;

        let (tx, rx) = oneshot::channel();
        {
            // Hold the writer lock across enqueue + write so queue
            // position always matches stdin order.
            let mut stdin = self.inner.stdin.lock().await;
            let writer = stdin.as_mut().ok_or(BridgeError::NotStarted)?;
            self.inner.turns.lock().push_back(Turn { tx, hooks });
            let envelope = rpc_envelope(
                &Uuid::new_v4().to_string(),
                "follow_up",
                json!({"message": text}),
            );
            if let Err(e) = write_line(writer, &envelope).await {
                self.inner.turns.lock().pop_back();
                return Err(BridgeError::WriteFailed(e.to_string()));
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::ChildExited),
        }
    }

    fn steer(&self, text: &str) {
        let inner = Arc::clone(&self.inner);
        let envelope = rpc_envelope(
            &Uuid::new_v4().to_string(),
            "follow_up",
            json!({"message": text}),
        );
        tokio::spawn(async move {
            let mut stdin = inner.stdin.lock().await;
            let Some(writer) = stdin.as_mut() else {
                tracing::warn!("steer with no agent stdin");
                return;
            };
            if let Err(e) = write_line(writer, &envelope).await {
                tracing::warn!(error = %e, "steer write failed");
            }
        });
    }

    async fn command(&self, rpc_type: &str, params: Value) -> Result<Value, BridgeError> {
        self.ensure_running()?;

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id.clone(), tx);

        let envelope = rpc_envelope(&id, rpc_type, params);
        {
            let mut stdin = self.inner.stdin.lock().await;
            let writer = match stdin.as_mut() {
                Some(w) => w,
                None => {
                    self.inner.pending.lock().remove(&id);
                    return Err(BridgeError::NotStarted);
                }
            };
            if let Err(e) = write_line(writer, &envelope).await {
                // A failed write rejects just this request; the rest of
                // the queue is cleaned up at exit.
                self.inner.pending.lock().remove(&id);
                return Err(BridgeError::WriteFailed(e.to_string()));
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::ChildExited),
        }
    }

    async fn stop(&self) -> Result<(), BridgeError> {
        match *self.inner.lifecycle.lock() {
            Lifecycle::Running => {}
            Lifecycle::Idle | Lifecycle::Exited => return Ok(()),
        }

        self.inner.fail_all(BridgeError::Stopped);

        let pid = *self.inner.pid.lock();
        if let Some(pid) = pid {
            let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
        }

        let mut exited = self.inner.exited_rx.clone();
        if tokio::time::timeout(STOP_GRACE, exited.wait_for(|v| *v)).await.is_err() {
            tracing::warn!(?pid, "agent ignored SIGTERM, sending SIGKILL");
            if let Some(pid) = pid {
                let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
            }
            let mut exited = self.inner.exited_rx.clone();
            let _ = tokio::time::timeout(STOP_GRACE, exited.wait_for(|v| *v)).await;
        }
        Ok(())
    }

    fn busy(&self) -> bool {
        !self.inner.turns.lock().is_empty()
    }

    fn state(&self) -> Lifecycle {
        *self.inner.lifecycle.lock()
    }

    fn subscribe(&self) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        self.inner.subscribers.lock().push(Subscriber { tx, dropped: 0 });
        rx
    }

    async fn wait_exited(&self) {
        let mut exited = self.inner.exited_rx.clone();
        let _ = exited.wait_for(|v| *v).await;
    }
}

impl Inner {
    /// Route one stdout JSON object: verbatim fan-out first, then the
    /// bridge's own interpretation.
    fn dispatch(&self, value: Value) {
        self.publish(&value);

        let Some(event) = AgentEvent::interpret(&value) else {
            return;
        };
        match event {
            AgentEvent::Response { id, success, data, error } => {
                let waiter = self.pending.lock().remove(&id);
                match waiter {
                    Some(tx) => {
                        let result = if success {
                            Ok(data.unwrap_or(Value::Null))
                        } else {
                            Err(BridgeError::Rpc(
                                error.unwrap_or_else(|| "unknown error".to_string()),
                            ))
                        };
                        let _ = tx.send(result);
                    }
                    None => tracing::debug!(%id, "response for unknown rpc id dropped"),
                }
            }
            AgentEvent::MessageUpdate {
                assistant_message_event: AssistantMessageEvent::TextDelta { delta },
            } => {
                self.accumulator.lock().push_str(&delta);
                let hook = self.turns.lock().front().and_then(|t| t.hooks.on_text.clone());
                if let Some(hook) = hook {
                    hook(&delta);
                }
            }
            AgentEvent::MessageUpdate { .. } => {
                // Thinking deltas reach subscribers but not the turn text.
            }
            AgentEvent::ToolExecutionStart { tool_name, args, .. } => {
                let hook =
                    self.turns.lock().front().and_then(|t| t.hooks.on_tool_start.clone());
                if let Some(hook) = hook {
                    hook(&ToolStart { tool_name, args });
                }
            }
            AgentEvent::AgentEnd => {
                let text = {
                    let mut acc = self.accumulator.lock();
                    let text = acc.trim().to_string();
                    acc.clear();
                    text
                };
                match self.turns.lock().pop_front() {
                    Some(turn) => {
                        let _ = turn.tx.send(Ok(text));
                    }
                    None => tracing::debug!("agent_end with no waiting turn dropped"),
                }
            }
            AgentEvent::ToolExecutionEnd { .. }
            | AgentEvent::AgentStart
            | AgentEvent::AutoCompactionStart
            | AgentEvent::AutoCompactionEnd => {}
        }
    }

    /// Non-blocking fan-out; a full subscriber loses this event.
    fn publish(&self, value: &Value) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain_mut(|sub| match sub.tx.try_send(value.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                sub.dropped += 1;
                tracing::debug!(dropped = sub.dropped, "subscriber queue full, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Reject every outstanding waiter with one terminal error.
    fn fail_all(&self, error: BridgeError) {
        let pending: Vec<_> = {
            let mut map = self.pending.lock();
            map.drain().map(|(_, tx)| tx).collect()
        };
        for tx in pending {
            let _ = tx.send(Err(error.clone()));
        }
        let turns: Vec<_> = {
            let mut queue = self.turns.lock();
            queue.drain(..).collect()
        };
        for turn in turns {
            let _ = turn.tx.send(Err(error.clone()));
        }
        self.accumulator.lock().clear();
    }

    fn handle_exit(&self) {
        *self.lifecycle.lock() = Lifecycle::Exited;
        self.fail_all(BridgeError::ChildExited);
        let _ = self.exited_tx.send(true);
    }
}

async fn write_line(writer: &mut ChildStdin, value: &Value) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(value).map_err(std::io::Error::other)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
