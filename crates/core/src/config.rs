// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration tree.
//!
//! Loaded once at startup from a YAML file. Invalid configuration is
//! fatal; nothing here hot-reloads. Server and platform credentials are
//! read-only after startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable that can supply the attach/webhook token.
pub const TOKEN_ENV_VAR: &str = "SIMPLE_BOT_TOKEN";

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Default agent child command and working directory.
    pub agent: AgentConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub sessions: SessionsConfig,

    #[serde(default)]
    pub cron: CronConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub heartbeat: Option<HeartbeatConfig>,

    #[serde(default)]
    pub usage: UsageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub listeners: ListenersConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for daily-rolling daemon log files. Stdout only when
    /// absent.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Agent child process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Command line to spawn (run through `sh -c`).
    pub command: String,
    /// Working directory for the child; daemon cwd when absent.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Senders allowed to talk to the daemon. Everyone else is dropped.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Session used when no route matches.
    #[serde(default = "default_session_name")]
    pub default: String,
    /// Ordered routing rules; first match wins.
    #[serde(default)]
    pub routes: Vec<RouteRule>,
    /// Per-session overrides, keyed by session name.
    #[serde(default)]
    pub named: HashMap<String, SessionConfig>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { default: default_session_name(), routes: Vec::new(), named: HashMap::new() }
    }
}

fn default_session_name() -> String {
    "main".to_string()
}

/// One routing rule. Absent predicates match anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    pub session: String,
}

impl RouteRule {
    /// True when every specified predicate matches.
    pub fn matches(&self, platform: &str, channel: &str) -> bool {
        self.platform.as_deref().is_none_or(|p| p == platform)
            && self.channel.as_deref().is_none_or(|c| c == channel)
    }
}

/// Per-session configuration. Fields fall back to the `agent` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    /// Stop the session after this many idle minutes. 0 disables.
    #[serde(default)]
    pub idle_timeout_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    /// Directory holding `*.md` job files.
    #[serde(default = "default_cron_dir")]
    pub dir: PathBuf,
    /// Cron is suppressed for this long after any user interaction.
    #[serde(default = "default_grace_ms")]
    pub grace_period_ms: u64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self { dir: default_cron_dir(), grace_period_ms: default_grace_ms() }
    }
}

fn default_cron_dir() -> PathBuf {
    PathBuf::from("cron")
}

fn default_grace_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token for `/api/*` and the attach WebSocket.
    /// `SIMPLE_BOT_TOKEN` overrides this when set.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port(), token: None }
    }
}

fn default_port() -> u16 {
    8844
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Human interval, e.g. `4h`, `30m`, `1h30m`.
    pub interval: String,
    /// `HH:MM-HH:MM` window; endpoints inclusive. Always active when absent.
    #[serde(default)]
    pub active_hours: Option<String>,
    /// Checklist file whose contents become the heartbeat prompt.
    pub checklist_path: PathBuf,
    /// Channel to notify with non-empty heartbeat responses.
    pub notify_room: String,
    /// Listener (platform name) that owns `notify_room`.
    pub platform: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageConfig {
    /// Append-only JSONL mirror of usage events. Disabled when absent.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

/// Credentials for the out-of-tree platform adapters. Held here so one
/// config file covers the whole deployment; the SDK bindings themselves
/// live outside this workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListenersConfig {
    #[serde(default)]
    pub matrix: Option<MatrixConfig>,
    #[serde(default)]
    pub discord: Option<DiscordConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    pub homeserver: String,
    pub user: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub token: Option<String>,
}

/// Configuration errors. All fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Load and validate configuration from a YAML file.
    ///
    /// `SIMPLE_BOT_TOKEN` in the environment takes precedence over
    /// `server.token` from the file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let mut config: Config = serde_yaml::from_str(&raw)?;
        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            if !token.is_empty() {
                config.server.token = Some(token);
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.command.trim().is_empty() {
            return Err(ConfigError::Invalid("agent.command must be non-empty".into()));
        }
        for (name, session) in &self.sessions.named {
            if let Some(cmd) = &session.command {
                if cmd.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "sessions.named.{name}.command must be non-empty when set"
                    )));
                }
            }
        }
        for (i, rule) in self.sessions.routes.iter().enumerate() {
            if rule.session.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "sessions.routes[{i}].session must be non-empty"
                )));
            }
        }
        Ok(())
    }

    /// Effective configuration for a named session, with fallbacks to
    /// the `agent` section applied.
    pub fn session_config(&self, name: &str) -> SessionConfig {
        let named = self.sessions.named.get(name).cloned().unwrap_or_default();
        SessionConfig {
            command: named.command.or_else(|| Some(self.agent.command.clone())),
            workdir: named.workdir.or_else(|| self.agent.workdir.clone()),
            idle_timeout_minutes: named.idle_timeout_minutes,
        }
    }

    /// All session names the daemon may route to (named sessions, route
    /// targets, and the default).
    pub fn session_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut push = |n: &str| {
            if !names.iter().any(|existing| existing == n) {
                names.push(n.to_string());
            }
        };
        push(&self.sessions.default);
        for rule in &self.sessions.routes {
            push(&rule.session);
        }
        let mut named: Vec<&String> = self.sessions.named.keys().collect();
        named.sort();
        for n in named {
            push(n);
        }
        names
    }

    /// JSON rendering with sensitive values masked.
    ///
    /// Every key named `token` or `password`, or ending in `_token`, has
    /// its string value replaced by `"***"`. All other values are
    /// pointwise identical to the plain serialization.
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        redact_value(&mut value);
        value
    }
}

fn redact_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if is_sensitive_key(key) && entry.is_string() {
                    *entry = serde_json::Value::String("***".to_string());
                } else {
                    redact_value(entry);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                redact_value(item);
            }
        }
        _ => {}
    }
}

fn is_sensitive_key(key: &str) -> bool {
    key == "token" || key == "password" || key.ends_with("_token")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
