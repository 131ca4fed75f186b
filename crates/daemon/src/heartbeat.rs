// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Heartbeat: a periodic prompt to the agent within active hours.
//!
//! On each tick the checklist file becomes a prompt to the default
//! session; a non-empty response is routed to the configured notify
//! room. Ticks are skipped outside active hours and while the bridge
//! is busy.

use crate::listener::{ListenerSet, Origin};
use crate::sessions::SessionManager;
use chrono::{Local, NaiveTime, Timelike};
use parking_lot::Mutex;
use sb_bridge::TurnHooks;
use sb_core::config::HeartbeatConfig;
use sb_core::SessionName;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("invalid heartbeat interval {value:?}: {reason}")]
    Interval { value: String, reason: String },

    #[error("invalid active_hours {0:?} (expected HH:MM-HH:MM)")]
    ActiveHours(String),
}

/// Inclusive daily window. Wrapping windows (`22:00-06:00`) span
/// midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveHours {
    start: NaiveTime,
    end: NaiveTime,
}

impl ActiveHours {
    pub fn parse(spec: &str) -> Result<Self, HeartbeatError> {
        let invalid = || HeartbeatError::ActiveHours(spec.to_string());
        let (start, end) = spec.split_once('-').ok_or_else(invalid)?;
        let start = parse_hhmm(start.trim()).ok_or_else(invalid)?;
        let end = parse_hhmm(end.trim()).ok_or_else(invalid)?;
        Ok(Self { start, end })
    }

    /// True when `time` falls inside the window; both endpoints count.
    pub fn contains(&self, time: NaiveTime) -> bool {
        let time = truncate_to_minute(time);
        if self.start <= self.end {
            self.start <= time && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let (h, m) = s.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
}

fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

pub struct Heartbeat {
    config: HeartbeatConfig,
    interval: Duration,
    active_hours: Option<ActiveHours>,
    sessions: SessionManager,
    listeners: ListenerSet,
    default_session: String,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Heartbeat {
    /// Validate the interval and active-hours grammar up front; both
    /// are fatal configuration errors.
    pub fn new(
        config: HeartbeatConfig,
        sessions: SessionManager,
        listeners: ListenerSet,
        default_session: String,
    ) -> Result<Self, HeartbeatError> {
        let interval = humantime::parse_duration(&config.interval).map_err(|e| {
            HeartbeatError::Interval { value: config.interval.clone(), reason: e.to_string() }
        })?;
        let active_hours = match &config.active_hours {
            Some(spec) => Some(ActiveHours::parse(spec)?),
            None => None,
        };
        Ok(Self {
            config,
            interval,
            active_hours,
            sessions,
            listeners,
            default_session,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    pub fn start(self: std::sync::Arc<Self>) {
        if !self.config.enabled {
            tracing::info!("heartbeat disabled");
            return;
        }
        let heartbeat = std::sync::Arc::clone(&self);
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(heartbeat.interval) => {}
                }
                if let Some(hours) = &heartbeat.active_hours {
                    if !hours.contains(Local::now().time()) {
                        tracing::debug!("heartbeat outside active hours");
                        continue;
                    }
                }
                heartbeat.tick().await;
            }
        });
        *self.task.lock() = Some(task);
        tracing::info!(interval = %self.config.interval, "heartbeat started");
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// One beat: checklist file in, response out to the notify room.
    pub async fn tick(&self) {
        let checklist = match tokio::fs::read_to_string(&self.config.checklist_path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(
                    path = %self.config.checklist_path.display(),
                    error = %e,
                    "heartbeat checklist unreadable, skipping"
                );
                return;
            }
        };
        if checklist.trim().is_empty() {
            return;
        }

        let session = SessionName::new(self.default_session.clone());
        let bridge = match self.sessions.get_or_start(&session).await {
            Ok(bridge) => bridge,
            Err(e) => {
                tracing::error!(error = %e, "heartbeat session unavailable");
                return;
            }
        };
        if bridge.busy() {
            tracing::info!("heartbeat skipped, bridge is busy");
            return;
        }

        match bridge.send_message(checklist.trim_end(), TurnHooks::none()).await {
            Ok(response) if !response.is_empty() => {
                let origin = Origin {
                    platform: self.config.platform.clone(),
                    channel: self.config.notify_room.clone(),
                };
                self.listeners.deliver(&origin, &response).await;
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "heartbeat turn failed"),
        }
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
