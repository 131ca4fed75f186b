// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn no_fields() -> BTreeMap<String, serde_json::Value> {
    BTreeMap::new()
}

#[test]
fn push_and_snapshot() {
    let buffer = LogBuffer::new();
    buffer.push(LogLevel::Info, "started", no_fields());
    buffer.push(LogLevel::Warn, "slow", no_fields());

    let entries = buffer.snapshot();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].message, "started");
    assert_eq!(entries[1].level, LogLevel::Warn);
}

#[test]
fn bounded_to_capacity() {
    let buffer = LogBuffer::new();
    for i in 0..250 {
        buffer.push(LogLevel::Info, format!("entry {i}"), no_fields());
    }
    let entries = buffer.snapshot();
    assert_eq!(entries.len(), 200);
    // Oldest 50 evicted.
    assert_eq!(entries[0].message, "entry 50");
    assert_eq!(entries[199].message, "entry 249");
}

#[test]
fn snapshot_is_a_copy() {
    let buffer = LogBuffer::new();
    buffer.push(LogLevel::Error, "boom", no_fields());
    let snapshot = buffer.snapshot();
    buffer.push(LogLevel::Info, "later", no_fields());
    assert_eq!(snapshot.len(), 1);
}

#[test]
fn fields_serialize_with_entry() {
    let buffer = LogBuffer::new();
    let mut fields = no_fields();
    fields.insert("session".into(), serde_json::json!("main"));
    buffer.push(LogLevel::Info, "routed", fields);

    let json = serde_json::to_value(&buffer.snapshot()[0]).unwrap();
    assert_eq!(json["level"], "info");
    assert_eq!(json["fields"]["session"], "main");
    assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
}
