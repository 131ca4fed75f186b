// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Policy layer over the session manager.
//!
//! Every inbound message runs the same pre-flight: authorization, size
//! cap, rate limit, slash-command dispatch, route resolution, then
//! steering (busy bridge) or a new turn. Tool-call summaries and the
//! final text response fan back out through the origin listener; a
//! failing listener is logged and never breaks the daemon.

use crate::activity::ActivityFeed;
use crate::listener::{IncomingMessage, ListenerSet, Origin};
use crate::models;
use parking_lot::Mutex;
use sb_bridge::{AgentBridge, TurnHooks};
use sb_core::{Clock, Config, RateLimiter, SessionName};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Messages longer than this (in codepoints) are dropped.
const MAX_MESSAGE_CHARS: usize = 4000;

/// Cap for the first line of a bash command in its tool summary.
const BASH_SUMMARY_CHARS: usize = 80;

/// The slash commands the daemon intercepts; anything else falls
/// through to the agent as a normal message.
const SLASH_COMMANDS: [&str; 5] = ["abort", "compress", "new", "model", "reload"];

pub struct Router<C: Clock> {
    config: Arc<Config>,
    sessions: crate::sessions::SessionManager,
    listeners: ListenerSet,
    limiter: RateLimiter<C>,
    clock: C,
    last_interaction: Arc<Mutex<Option<Instant>>>,
    activity: ActivityFeed,
}

impl<C: Clock> Router<C> {
    pub fn new(
        config: Arc<Config>,
        sessions: crate::sessions::SessionManager,
        listeners: ListenerSet,
        clock: C,
    ) -> Self {
        Self {
            config,
            sessions,
            listeners,
            limiter: RateLimiter::new(clock.clone()),
            clock,
            last_interaction: Arc::new(Mutex::new(None)),
            activity: ActivityFeed::new(),
        }
    }

    /// Read-only probe for the scheduler's grace window; breaks the
    /// scheduler → daemon reference cycle.
    pub fn interaction_probe(&self) -> Arc<dyn Fn() -> Option<Instant> + Send + Sync> {
        let last = Arc::clone(&self.last_interaction);
        Arc::new(move || *last.lock())
    }

    pub fn activity(&self) -> ActivityFeed {
        self.activity.clone()
    }

    /// Full pre-flight and dispatch for one inbound message.
    pub async fn handle_message(&self, msg: IncomingMessage) {
        let origin = msg.origin();

        // 1. Authorization.
        if !self.config.security.allowed_users.iter().any(|u| u == &msg.sender) {
            tracing::warn!(sender = %msg.sender, "message from unauthorized sender dropped");
            return;
        }

        // 2. Size cap.
        if msg.text.chars().count() > MAX_MESSAGE_CHARS {
            tracing::warn!(sender = %msg.sender, len = msg.text.chars().count(), "oversized message dropped");
            return;
        }

        // 3. Rate limit per sender.
        if !self.limiter.check(&msg.sender) {
            tracing::warn!(sender = %msg.sender, "rate-limited message dropped");
            return;
        }

        // 4. Record user activity (feeds the cron grace window).
        *self.last_interaction.lock() = Some(self.clock.now());
        self.activity.record(&msg);

        // 5. Slash commands; unknown ones fall through as messages.
        if let Some((command, args)) = parse_slash(&msg.text) {
            self.handle_slash(&origin, &command, args).await;
            return;
        }

        // 6. Route to a session.
        let session = self.sessions.resolve(&msg.platform, &msg.channel);
        let bridge = match self.sessions.get_or_start(&session).await {
            Ok(bridge) => bridge,
            Err(e) => {
                tracing::error!(session = %session, error = %e, "failed to obtain session bridge");
                return;
            }
        };
        self.sessions.record_activity(session.as_str());

        let formatted = format!("[{} {}] {}: {}", msg.platform, msg.channel, msg.sender, msg.text);

        // 7. Steering: a busy bridge gets the text inside the current
        // turn; no second reply is produced.
        if bridge.busy() {
            tracing::info!(session = %session, "bridge busy, steering");
            bridge.steer(&formatted);
            return;
        }

        // 8. New turn. Tool-start summaries are forwarded as they
        // arrive, strictly before the final response.
        let (summary_tx, mut summary_rx) = mpsc::unbounded_channel::<String>();
        let hooks = TurnHooks {
            on_tool_start: Some(Arc::new(move |tool: &sb_bridge::ToolStart| {
                let _ = summary_tx.send(tool_summary(&tool.tool_name, &tool.args));
            })),
            on_text: None,
        };
        let forwarder = {
            let listeners = self.listeners.clone();
            let origin = origin.clone();
            tokio::spawn(async move {
                while let Some(text) = summary_rx.recv().await {
                    listeners.deliver(&origin, &text).await;
                }
            })
        };

        match bridge.send_message(&formatted, hooks).await {
            Ok(response) => {
                // The bridge dropped the hooks with the finished turn,
                // so the forwarder drains and exits before the final
                // response goes out.
                let _ = forwarder.await;
                if !response.is_empty() {
                    self.listeners.deliver(&origin, &response).await;
                }
            }
            Err(e) => {
                let _ = forwarder.await;
                tracing::error!(session = %session, error = %e, "turn failed");
            }
        }
    }

    /// Webhook entry point: same routing and steering policy. The HTTP
    /// response carries the reply; a `notify` room additionally gets
    /// the reply pushed through a listener.
    pub async fn handle_webhook(
        &self,
        message: &str,
        source: &str,
        session: Option<&str>,
        notify: Option<&str>,
    ) -> Result<WebhookOutcome, String> {
        *self.last_interaction.lock() = Some(self.clock.now());

        let session = match session {
            Some(name) => SessionName::new(name),
            None => SessionName::new(self.config.sessions.default.clone()),
        };
        let bridge =
            self.sessions.get_or_start(&session).await.map_err(|e| e.to_string())?;
        self.sessions.record_activity(session.as_str());

        let formatted = format!("[webhook {source}] {message}");
        if bridge.busy() {
            bridge.steer(&formatted);
            return Ok(WebhookOutcome::Queued);
        }
        let response = bridge
            .send_message(&formatted, TurnHooks::none())
            .await
            .map_err(|e| e.to_string())?;

        if let Some(room) = notify {
            if !response.is_empty() {
                if let Some(platform) = self.notify_platform() {
                    let origin = Origin { platform, channel: room.to_string() };
                    self.listeners.deliver(&origin, &response).await;
                } else {
                    tracing::warn!(room, "webhook notify requested but no listener available");
                }
            }
        }
        Ok(WebhookOutcome::Reply(response))
    }

    /// Platform that owns push notifications: the heartbeat's listener
    /// when configured, else the first connected listener.
    fn notify_platform(&self) -> Option<String> {
        self.config
            .heartbeat
            .as_ref()
            .map(|hb| hb.platform.clone())
            .or_else(|| self.listeners.iter().next().map(|l| l.name().to_string()))
    }

    /// Dispatch one recognized slash command, replying to `origin`.
    async fn handle_slash(&self, origin: &Origin, command: &str, args: &str) {
        let session = self.sessions.resolve(&origin.platform, &origin.channel);
        let bridge = match self.sessions.get_or_start(&session).await {
            Ok(bridge) => bridge,
            Err(e) => {
                self.reply(origin, &format!("⚠️ Failed to start session: {e}")).await;
                return;
            }
        };
        self.sessions.record_activity(session.as_str());

        match command {
            "abort" => match bridge.command("abort", Value::Null).await {
                Ok(_) => self.reply(origin, "⏹️ Aborted.").await,
                Err(e) => self.reply(origin, &format!("⚠️ Abort failed: {e}")).await,
            },
            "compress" => {
                self.reply(origin, "🗜️ Compressing context...").await;
                let params = if args.is_empty() {
                    Value::Null
                } else {
                    json!({"customInstructions": args})
                };
                match bridge.command("compact", params).await {
                    Ok(data) => {
                        let before = data
                            .get("tokensBefore")
                            .and_then(|v| v.as_u64())
                            .map(|n| n.to_string())
                            .unwrap_or_else(|| "unknown".to_string());
                        self.reply(origin, &format!("✅ Compressed. Tokens before: {before}"))
                            .await;
                    }
                    Err(e) => self.reply(origin, &format!("⚠️ Compact failed: {e}")).await,
                }
            }
            "new" => match bridge.command("new_session", Value::Null).await {
                Ok(_) => self.reply(origin, "🆕 Started a new session.").await,
                Err(e) => self.reply(origin, &format!("⚠️ New session failed: {e}")).await,
            },
            "reload" => match bridge.send_message("/reload-runtime", TurnHooks::none()).await {
                Ok(response) if !response.is_empty() => self.reply(origin, &response).await,
                Ok(_) => {}
                Err(e) => self.reply(origin, &format!("⚠️ Reload failed: {e}")).await,
            },
            "model" => self.handle_model_command(origin, &bridge, args).await,
            other => {
                // parse_slash only yields known commands.
                tracing::error!(command = other, "unexpected slash command");
            }
        }
    }

    async fn handle_model_command(
        &self,
        origin: &Origin,
        bridge: &Arc<dyn AgentBridge>,
        args: &str,
    ) {
        let data = match bridge.command("get_available_models", Value::Null).await {
            Ok(data) => data,
            Err(e) => {
                self.reply(origin, &format!("⚠️ Could not list models: {e}")).await;
                return;
            }
        };
        let catalog = models::parse_models(&data);

        if args.is_empty() {
            self.reply(origin, &models::format_model_list(&catalog)).await;
            return;
        }

        let Some(model) = models::match_model(&catalog, args) else {
            self.reply(origin, &format!("⚠️ No model matching \"{args}\"")).await;
            return;
        };
        match bridge.command("set_model", json!({"modelId": model.id})).await {
            Ok(_) => self.reply(origin, &format!("✅ Model set to {}", model.id)).await,
            Err(e) => self.reply(origin, &format!("⚠️ Model switch failed: {e}")).await,
        }
    }

    async fn reply(&self, origin: &Origin, text: &str) {
        self.listeners.deliver(origin, text).await;
    }
}

/// Result of a webhook dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The turn completed; the response travels back synchronously.
    Reply(String),
    /// The bridge was busy; the message was steered into the running
    /// turn instead.
    Queued,
}

/// Recognize `/command [args]`. Names are case-insensitive; unknown
/// commands return `None` and fall through as normal messages.
fn parse_slash(text: &str) -> Option<(String, &str)> {
    let rest = text.strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next()?.to_lowercase();
    if !SLASH_COMMANDS.contains(&command.as_str()) {
        return None;
    }
    let args = parts.next().unwrap_or("").trim();
    Some((command, args))
}

/// One-line summary of a tool invocation. Byte-stable: tests assert the
/// exact strings.
pub fn tool_summary(tool_name: &str, args: &Value) -> String {
    let path = || args.get("path").and_then(|v| v.as_str()).unwrap_or("file");
    match tool_name {
        "read" => format!("📖 Reading `{}`", path()),
        "bash" => {
            let command = args.get("command").and_then(|v| v.as_str()).unwrap_or("");
            let first_line = command.lines().next().unwrap_or("");
            format!("⚡ `{}`", truncate_chars(first_line, BASH_SUMMARY_CHARS))
        }
        "edit" => format!("✏️ Editing `{}`", path()),
        "write" => format!("📝 Writing `{}`", path()),
        other => format!("🔧 {other}"),
    }
}

/// Codepoint-safe truncation with a trailing ellipsis.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
