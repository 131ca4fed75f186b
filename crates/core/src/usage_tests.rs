// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn event(ts: u64, context: u64) -> UsageEvent {
    UsageEvent {
        timestamp_ms: ts,
        model: "claude-sonnet-4-5".into(),
        input_tokens: 100,
        output_tokens: 20,
        context_size: context,
        cost: 0.01,
        compaction: false,
        session: Some("main".into()),
    }
}

#[yare::parameterized(
    clear_shrink   = { 10_000, 5_000, true },
    just_below     = { 10_000, 6_999, true },
    at_threshold   = { 10_000, 7_000, false },
    above          = { 10_000, 9_000, false },
    growth         = { 10_000, 12_000, false },
)]
fn compaction_threshold(previous: u64, new: u64, expected: bool) {
    assert_eq!(detect_compaction(previous, new), expected);
}

#[test]
fn ring_bounded_to_capacity() {
    let log = UsageLog::new(None);
    for i in 0..1_100u64 {
        log.record(event(i, 1_000));
    }
    let events = log.snapshot();
    assert_eq!(events.len(), 1_000);
    assert_eq!(events[0].timestamp_ms, 100);
}

#[test]
fn totals_since_window() {
    let log = UsageLog::new(None);
    log.record(event(1_000, 1_000));
    log.record(event(2_000, 1_000));
    let mut compacting = event(3_000, 500);
    compacting.compaction = true;
    log.record(compacting);

    let totals = log.totals_since(2_000);
    assert_eq!(totals.events, 2);
    assert_eq!(totals.input_tokens, 200);
    assert_eq!(totals.compactions, 1);
}

#[test]
fn mirror_and_reload_applies_retention() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics").join("usage.jsonl");

    let log = UsageLog::new(Some(path.clone()));
    log.record(event(1_000, 1_000));
    log.record(event(50_000, 1_000));
    log.record(event(90_000, 1_000));

    // Retain only the last 60 seconds as of t=100s.
    let reloaded = UsageLog::load(path, 100_000, 60_000);
    let events = reloaded.snapshot();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].timestamp_ms, 50_000);
}

#[test]
fn reload_skips_garbage_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("usage.jsonl");
    std::fs::write(&path, "not json\n{\"timestamp_ms\":5,\"model\":\"m\",\"input_tokens\":1,\"output_tokens\":1,\"context_size\":10,\"cost\":0.0,\"compaction\":false}\n").unwrap();

    let log = UsageLog::load(path, 10, 100);
    assert_eq!(log.snapshot().len(), 1);
}

#[test]
fn last_context_size_tracks_tail() {
    let log = UsageLog::new(None);
    assert_eq!(log.last_context_size(), None);
    log.record(event(1, 123));
    log.record(event(2, 456));
    assert_eq!(log.last_context_size(), Some(456));
}
