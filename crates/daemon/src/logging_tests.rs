// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sb_core::LogLevel;
use tracing_subscriber::layer::SubscriberExt;

fn with_ring(f: impl FnOnce()) -> LogBuffer {
    let buffer = LogBuffer::new();
    let subscriber = tracing_subscriber::registry().with(RingLayer::new(buffer.clone()));
    tracing::subscriber::with_default(subscriber, f);
    buffer
}

#[test]
fn captures_levels_and_message() {
    let buffer = with_ring(|| {
        tracing::info!("daemon started");
        tracing::warn!("slow listener");
        tracing::error!("agent exited unexpectedly");
        tracing::debug!("not captured");
    });

    let entries = buffer.snapshot();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].level, LogLevel::Info);
    assert_eq!(entries[0].message, "daemon started");
    assert_eq!(entries[1].level, LogLevel::Warn);
    assert_eq!(entries[2].level, LogLevel::Error);
}

#[test]
fn captures_structured_fields() {
    let buffer = with_ring(|| {
        tracing::info!(session = "main", attempts = 3u64, busy = false, "routed");
    });

    let entries = buffer.snapshot();
    assert_eq!(entries[0].message, "routed");
    assert_eq!(entries[0].fields["session"], "main");
    assert_eq!(entries[0].fields["attempts"], 3);
    assert_eq!(entries[0].fields["busy"], false);
}
