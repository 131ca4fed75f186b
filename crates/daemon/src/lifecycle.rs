// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: wiring, startup, and graceful shutdown.
//!
//! Assembly order: session manager, router, scheduler, heartbeat, then
//! the HTTP/attach server. Shutdown reverses it on SIGTERM/SIGINT. An
//! unsolicited agent exit is fatal: the daemon logs and exits 1 rather
//! than limp along with a dead bridge.

use crate::activity::{ActivityEntry, ActivityFeed};
use crate::attach::{AttachRpc, AttachState};
use crate::heartbeat::{Heartbeat, HeartbeatError};
use crate::http::{self, AppState, DashboardProvider, WebhookHandler};
use crate::listener::ListenerSet;
use crate::router::{Router, WebhookOutcome};
use crate::scheduler::{JobStatus, Scheduler, SchedulerError};
use crate::sessions::{ProcessBridgeFactory, SessionEvent, SessionManager};
use async_trait::async_trait;
use parking_lot::Mutex;
use sb_core::usage::{detect_compaction, UsageEvent, UsageLog, UsageTotals};
use sb_core::{Clock, Config, LogBuffer, LogEntry, SessionName, SystemClock};
use sb_jobs::Notify;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Cadence of the session-stats usage collector.
const USAGE_INTERVAL_SECS: u64 = 30;

/// How much mirrored usage history to reload at startup (7 days).
const USAGE_RETENTION_MS: u64 = 7 * 24 * 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Heartbeat(#[from] HeartbeatError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("listener {name} failed to connect: {reason}")]
    ListenerConnect { name: String, reason: String },

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// The assembled daemon.
pub struct Daemon {
    config: Arc<Config>,
    listeners: ListenerSet,
    sessions: SessionManager,
    router: Arc<Router<SystemClock>>,
    scheduler: Scheduler,
    heartbeat: Option<Arc<Heartbeat>>,
    attach: AttachState,
    usage: UsageLog,
    logbuf: LogBuffer,
    clock: SystemClock,
    start_time: Instant,
    start_epoch_ms: u64,
    shutdown: CancellationToken,
    current_model: Arc<Mutex<Option<String>>>,
    context_tokens: Arc<Mutex<Option<u64>>>,
}

impl Daemon {
    pub fn new(
        config: Arc<Config>,
        listeners: ListenerSet,
        logbuf: LogBuffer,
    ) -> Result<Self, DaemonError> {
        let clock = SystemClock;
        let sessions =
            SessionManager::new(Arc::clone(&config), Arc::new(ProcessBridgeFactory));
        let router = Arc::new(Router::new(
            Arc::clone(&config),
            sessions.clone(),
            listeners.clone(),
            clock.clone(),
        ));

        let scheduler = Scheduler::new(
            config.cron.dir.clone(),
            config.cron.grace_period_ms,
            config.sessions.default.clone(),
            sessions.clone(),
            Some(router.interaction_probe()),
        );

        let heartbeat = match &config.heartbeat {
            Some(hb_config) => Some(Arc::new(Heartbeat::new(
                hb_config.clone(),
                sessions.clone(),
                listeners.clone(),
                config.sessions.default.clone(),
            )?)),
            None => None,
        };

        let usage = match &config.usage.log_path {
            Some(path) => UsageLog::load(path.clone(), clock.epoch_ms(), USAGE_RETENTION_MS),
            None => UsageLog::new(None),
        };

        let attach = AttachState::new(
            config.server.token.clone(),
            Arc::new(BridgeRpc {
                sessions: sessions.clone(),
                default_session: config.sessions.default.clone(),
            }),
        );

        Ok(Self {
            start_epoch_ms: clock.epoch_ms(),
            config,
            listeners,
            sessions,
            router,
            scheduler,
            heartbeat,
            attach,
            usage,
            logbuf,
            clock,
            start_time: Instant::now(),
            shutdown: CancellationToken::new(),
            current_model: Arc::new(Mutex::new(None)),
            context_tokens: Arc::new(Mutex::new(None)),
        })
    }

    /// Run until a signal or a fatal condition; returns the exit code.
    pub async fn run(&self) -> Result<i32, DaemonError> {
        if self.config.server.token.is_none() {
            tracing::warn!(
                "no server token configured ({} unset): /api and /attach will reject all requests",
                sb_core::config::TOKEN_ENV_VAR
            );
        }

        // 1. Listeners feed one inbox; each message is handled on its
        // own task so a long turn never blocks ingress.
        let (inbox_tx, mut inbox_rx) = mpsc::channel(256);
        for listener in self.listeners.iter() {
            listener.connect(inbox_tx.clone()).await.map_err(|e| {
                DaemonError::ListenerConnect {
                    name: listener.name().to_string(),
                    reason: e.to_string(),
                }
            })?;
            tracing::info!(platform = listener.name(), "listener connected");
        }
        drop(inbox_tx);
        {
            let router = Arc::clone(&self.router);
            tokio::spawn(async move {
                while let Some(message) = inbox_rx.recv().await {
                    let router = Arc::clone(&router);
                    tokio::spawn(async move { router.handle_message(message).await });
                }
            });
        }

        // 2. Session events: mirror bridge streams to attach clients;
        // treat unsolicited exits as fatal.
        let (fatal_tx, mut fatal_rx) = watch::channel(false);
        {
            let mut events = self.sessions.subscribe_events();
            let attach = self.attach.clone();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(SessionEvent::Started { name, bridge }) => {
                            let mut stream = bridge.subscribe();
                            let attach = attach.clone();
                            tokio::spawn(async move {
                                while let Some(event) = stream.recv().await {
                                    attach.broadcast(&event);
                                }
                                tracing::debug!(session = %name, "event mirror ended");
                            });
                        }
                        Ok(SessionEvent::Exited { name }) => {
                            tracing::error!(session = %name, "agent exited unexpectedly, shutting down");
                            let _ = fatal_tx.send(true);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "session event stream lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
            });
        }

        // 3. Scheduler, with job responses routed to notify targets.
        self.scheduler.start()?;
        {
            let mut responses = self.scheduler.subscribe();
            let listeners = self.listeners.clone();
            let default_notify = self.default_notify_origin();
            let notify_platform = self
                .config
                .heartbeat
                .as_ref()
                .map(|hb| hb.platform.clone())
                .or_else(|| self.listeners.iter().next().map(|l| l.name().to_string()));
            tokio::spawn(async move {
                while let Ok(response) = responses.recv().await {
                    let origin = match &response.notify {
                        Notify::None => continue,
                        Notify::Room(room) => notify_platform.clone().map(|platform| {
                            crate::listener::Origin { platform, channel: room.clone() }
                        }),
                        Notify::Inherit => default_notify.clone(),
                    };
                    let Some(origin) = origin else {
                        tracing::debug!(job = %response.job, "job response with no notify target");
                        continue;
                    };
                    let text = format!("[{}] {}", response.job, response.response);
                    listeners.deliver(&origin, &text).await;
                }
            });
        }

        // 4. Heartbeat.
        if let Some(heartbeat) = &self.heartbeat {
            Arc::clone(heartbeat).start();
        }

        // 5. Usage collector.
        self.spawn_usage_collector();

        // 6. HTTP + attach server.
        let app_state = AppState::new(
            self.config.server.token.clone(),
            self.dashboard(),
            Some(Arc::new(RouterWebhook { router: Arc::clone(&self.router) })
                as Arc<dyn WebhookHandler>),
            self.attach.clone(),
        );
        let (http_listener, addr) = http::bind(self.config.server.port).await?;
        tracing::info!(%addr, "http server listening");
        let server = {
            let router = http::build_router(app_state);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move { http::serve(http_listener, router, shutdown).await })
        };

        // 7. Wait for a stop condition.
        let exit_code = tokio::select! {
            _ = wait_for_signal() => {
                tracing::info!("shutdown signal received");
                0
            }
            _ = fatal_rx.wait_for(|fatal| *fatal) => 1,
        };

        self.shutdown_sequence().await;
        let _ = server.await;
        Ok(exit_code)
    }

    /// Stop order: scheduler, heartbeat, listeners, attach sockets,
    /// HTTP server, then every session.
    async fn shutdown_sequence(&self) {
        self.scheduler.stop().await;
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.stop();
        }
        for listener in self.listeners.iter() {
            if let Err(e) = listener.disconnect().await {
                tracing::warn!(platform = listener.name(), error = %e, "listener disconnect failed");
            }
        }
        self.attach.shutdown();
        self.shutdown.cancel();
        self.sessions.stop_all().await;
        tracing::info!("daemon stopped");
    }

    fn default_notify_origin(&self) -> Option<crate::listener::Origin> {
        self.config.heartbeat.as_ref().map(|hb| crate::listener::Origin {
            platform: hb.platform.clone(),
            channel: hb.notify_room.clone(),
        })
    }

    /// Periodic `get_session_stats` sampling into the usage log.
    fn spawn_usage_collector(&self) {
        let interval_secs = std::env::var("SB_METRICS_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(USAGE_INTERVAL_SECS);
        let sessions = self.sessions.clone();
        let default_session = self.config.sessions.default.clone();
        let usage = self.usage.clone();
        let clock = self.clock.clone();
        let current_model = Arc::clone(&self.current_model);
        let context_tokens = Arc::clone(&self.context_tokens);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = interval.tick() => {}
                }
                let Some(bridge) = sessions.bridge(&default_session) else { continue };
                if bridge.busy() {
                    continue;
                }
                let stats = match bridge.command("get_session_stats", Value::Null).await {
                    Ok(stats) => stats,
                    Err(e) => {
                        tracing::debug!(error = %e, "usage sampling failed");
                        continue;
                    }
                };
                let Some(event) = usage_event_from_stats(
                    &stats,
                    clock.epoch_ms(),
                    usage.last_context_size(),
                    &default_session,
                ) else {
                    continue;
                };
                *current_model.lock() = Some(event.model.clone());
                *context_tokens.lock() = Some(event.context_size);
                usage.record(event);
            }
        });
    }

    fn dashboard(&self) -> Arc<dyn DashboardProvider> {
        Arc::new(DashboardState {
            config: Arc::clone(&self.config),
            listeners: self.listeners.clone(),
            scheduler: self.scheduler.clone(),
            usage: self.usage.clone(),
            logbuf: self.logbuf.clone(),
            activity: self.router.activity(),
            clock: self.clock.clone(),
            start_time: self.start_time,
            start_epoch_ms: self.start_epoch_ms,
            current_model: Arc::clone(&self.current_model),
            context_tokens: Arc::clone(&self.context_tokens),
        })
    }
}

/// Map a `get_session_stats` payload onto a usage event. Lenient: a
/// payload without token counts yields nothing.
fn usage_event_from_stats(
    stats: &Value,
    now_ms: u64,
    previous_context: Option<u64>,
    session: &str,
) -> Option<UsageEvent> {
    let input_tokens = stats.get("inputTokens").and_then(|v| v.as_u64())?;
    let output_tokens = stats.get("outputTokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let context_size = stats
        .get("contextTokens")
        .or_else(|| stats.get("contextSize"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let model = stats
        .get("model")
        .map(|m| match m {
            Value::String(s) => s.clone(),
            other => other
                .get("id")
                .or_else(|| other.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
        })
        .unwrap_or_else(|| "unknown".to_string());
    let cost = stats.get("costUsd").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let compaction = previous_context
        .map(|previous| detect_compaction(previous, context_size))
        .unwrap_or(false);

    Some(UsageEvent {
        timestamp_ms: now_ms,
        model,
        input_tokens,
        output_tokens,
        context_size,
        cost,
        compaction,
        session: Some(session.to_string()),
    })
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

/// RPC pass-through for attach clients: `{type, ...params}` against the
/// default session's bridge.
struct BridgeRpc {
    sessions: SessionManager,
    default_session: String,
}

#[async_trait]
impl AttachRpc for BridgeRpc {
    async fn handle(&self, request: Value) -> Result<Value, String> {
        let mut request = request;
        let object = request.as_object_mut().ok_or("expected an object")?;
        let rpc_type = object
            .remove("type")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or("missing type")?;
        let params = Value::Object(object.clone());

        let session = SessionName::new(self.default_session.clone());
        let bridge =
            self.sessions.get_or_start(&session).await.map_err(|e| e.to_string())?;
        bridge.command(&rpc_type, params).await.map_err(|e| e.to_string())
    }
}

/// Webhook capability backed by the router's policy.
struct RouterWebhook {
    router: Arc<Router<SystemClock>>,
}

#[async_trait]
impl WebhookHandler for RouterWebhook {
    async fn handle(
        &self,
        message: &str,
        source: &str,
        session: Option<&str>,
        notify: Option<&str>,
    ) -> Result<WebhookOutcome, String> {
        self.router.handle_webhook(message, source, session, notify).await
    }
}

struct DashboardState {
    config: Arc<Config>,
    listeners: ListenerSet,
    scheduler: Scheduler,
    usage: UsageLog,
    logbuf: LogBuffer,
    activity: ActivityFeed,
    clock: SystemClock,
    start_time: Instant,
    start_epoch_ms: u64,
    current_model: Arc<Mutex<Option<String>>>,
    context_tokens: Arc<Mutex<Option<u64>>>,
}

impl DashboardProvider for DashboardState {
    fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    fn start_epoch_ms(&self) -> u64 {
        self.start_epoch_ms
    }

    fn current_model(&self) -> Option<String> {
        self.current_model.lock().clone()
    }

    fn context_tokens(&self) -> Option<u64> {
        *self.context_tokens.lock()
    }

    fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn cron_jobs(&self) -> Vec<JobStatus> {
        self.scheduler.job_statuses()
    }

    fn usage_today(&self) -> UsageTotals {
        let day_ms = 24 * 60 * 60 * 1000;
        self.usage.totals_since(self.clock.epoch_ms().saturating_sub(day_ms))
    }

    fn usage_week(&self) -> UsageTotals {
        let week_ms = 7 * 24 * 60 * 60 * 1000;
        self.usage.totals_since(self.clock.epoch_ms().saturating_sub(week_ms))
    }

    fn activity(&self) -> Vec<ActivityEntry> {
        self.activity.snapshot()
    }

    fn logs(&self) -> Vec<LogEntry> {
        self.logbuf.snapshot()
    }

    fn session_names(&self) -> Vec<String> {
        self.config.session_names()
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
