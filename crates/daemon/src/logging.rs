// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracing setup: stdout, optional daily file logs, and a layer that
//! mirrors info/warn/error events into the shared in-memory ring for
//! the dashboard.

use sb_core::{LogBuffer, LogLevel};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Layer copying events into a [`LogBuffer`].
pub struct RingLayer {
    buffer: LogBuffer,
}

impl RingLayer {
    pub fn new(buffer: LogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for RingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = match *event.metadata().level() {
            Level::ERROR => LogLevel::Error,
            Level::WARN => LogLevel::Warn,
            Level::INFO => LogLevel::Info,
            // The ring holds operator-facing entries only.
            _ => return,
        };
        let mut collector = FieldCollector::default();
        event.record(&mut collector);
        self.buffer.push(level, collector.message, collector.fields);
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: BTreeMap<String, serde_json::Value>,
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.insert(field.name().to_string(), json!(format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), json!(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), json!(value));
    }
}

/// Install the global subscriber: env-filtered stdout, the dashboard
/// ring, and (when configured) daily-rolling file logs. The returned
/// guard must live as long as the process for file logs to flush.
pub fn init(
    buffer: LogBuffer,
    log_dir: Option<&Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let ring = RingLayer::new(buffer);
    let stdout = tracing_subscriber::fmt::layer();

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sbd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            tracing_subscriber::registry().with(filter).with(stdout).with(file).with(ring).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stdout).with(ring).init();
            None
        }
    }
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
