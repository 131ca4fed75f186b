// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::testing;
use serde_json::json;
use std::time::Duration;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

async fn started(command: String) -> Bridge {
    let bridge = Bridge::new(command, None);
    bridge.start().await.unwrap();
    bridge
}

async fn with_timeout<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(TEST_TIMEOUT, fut).await.expect("test timed out")
}

#[tokio::test]
async fn command_round_trip() {
    let bridge = started(testing::rpc_echo_agent()).await;
    let data = with_timeout(bridge.command("get_state", serde_json::Value::Null)).await.unwrap();
    assert_eq!(data, json!({"ok": true}));
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn command_failure_rejects_caller() {
    let bridge = started(testing::rpc_error_agent("model not found")).await;
    let err = with_timeout(bridge.command("set_model", json!({"modelId": "x"}))).await.unwrap_err();
    assert!(matches!(err, BridgeError::Rpc(msg) if msg == "model not found"));
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn send_message_resolves_trimmed_accumulated_text() {
    let bridge = started(testing::full_turn_agent()).await;
    let reply = with_timeout(bridge.send_message("hey", TurnHooks::none())).await.unwrap();
    assert_eq!(reply, "All tests pass!");
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn turn_hooks_fire_in_order() {
    let bridge = started(testing::full_turn_agent()).await;

    let events: std::sync::Arc<parking_lot::Mutex<Vec<String>>> = Default::default();
    let tool_log = std::sync::Arc::clone(&events);
    let text_log = std::sync::Arc::clone(&events);
    let hooks = TurnHooks {
        on_tool_start: Some(std::sync::Arc::new(move |tool: &ToolStart| {
            tool_log.lock().push(format!("tool:{}", tool.tool_name));
        })),
        on_text: Some(std::sync::Arc::new(move |delta: &str| {
            text_log.lock().push(format!("text:{delta}"));
        })),
    };

    let reply = with_timeout(bridge.send_message("hey", hooks)).await.unwrap();
    assert_eq!(reply, "All tests pass!");
    assert_eq!(
        *events.lock(),
        vec!["tool:read", "text:  All tests", "tool:bash", "text: pass!  "]
    );
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn turns_resolve_fifo() {
    let bridge = started(testing::counting_turn_agent()).await;

    let first = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.send_message("a", TurnHooks::none()).await })
    };
    // Give the first turn time to hit the wire before enqueueing the second.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.send_message("b", TurnHooks::none()).await })
    };

    let first = with_timeout(first).await.unwrap().unwrap();
    let second = with_timeout(second).await.unwrap().unwrap();
    assert_eq!(first, "reply 1");
    assert_eq!(second, "reply 2");
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn busy_tracks_turn_queue() {
    let bridge = started(testing::silent_agent()).await;
    assert!(!bridge.busy());

    let pending = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.send_message("hang", TurnHooks::none()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(bridge.busy());

    bridge.stop().await.unwrap();
    let err = with_timeout(pending).await.unwrap().unwrap_err();
    assert!(matches!(err, BridgeError::Stopped));
    assert!(!bridge.busy());
}

#[tokio::test]
async fn steer_writes_without_enqueueing() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("received.txt");
    let bridge = started(testing::recording_agent(&log)).await;

    bridge.steer("into the turn");
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!bridge.busy());
    let received = std::fs::read_to_string(&log).unwrap();
    assert!(received.contains("\"type\":\"follow_up\""));
    assert!(received.contains("into the turn"));
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn child_exit_rejects_pending_and_is_terminal() {
    let bridge = started(testing::exit_after_first_line_agent(3)).await;

    let err = with_timeout(bridge.command("get_state", serde_json::Value::Null))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::ChildExited));

    with_timeout(bridge.wait_exited()).await;
    assert_eq!(bridge.state(), Lifecycle::Exited);

    // Exited bridges reject new work and cannot restart.
    let err = bridge.send_message("more", TurnHooks::none()).await.unwrap_err();
    assert!(matches!(err, BridgeError::ChildExited));
    let err = bridge.start().await.unwrap_err();
    assert!(matches!(err, BridgeError::ChildExited));
}

#[tokio::test]
async fn start_twice_is_an_error() {
    let bridge = started(testing::silent_agent()).await;
    let err = bridge.start().await.unwrap_err();
    assert!(matches!(err, BridgeError::AlreadyStarted));
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn stop_is_idempotent() {
    let bridge = started(testing::silent_agent()).await;
    bridge.stop().await.unwrap();
    bridge.stop().await.unwrap();
    assert_eq!(bridge.state(), Lifecycle::Exited);
}

#[tokio::test]
async fn stop_before_start_is_ok() {
    let bridge = Bridge::new(testing::silent_agent(), None);
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_response_id_dropped() {
    // Agent emits a stray response before echoing the real one.
    let command = r#"printf '{"type":"response","id":"stray","success":true}\n'
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  printf '{"type":"response","id":"%s","success":true,"data":{"ok":true}}\n' "$id"
done"#
        .to_string();
    let bridge = started(command).await;
    let data = with_timeout(bridge.command("get_state", serde_json::Value::Null)).await.unwrap();
    assert_eq!(data, json!({"ok": true}));
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn subscribers_see_events_verbatim_in_order() {
    let bridge = started(testing::full_turn_agent()).await;
    let mut events = bridge.subscribe();

    let _ = with_timeout(bridge.send_message("go", TurnHooks::none())).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..5 {
        seen.push(with_timeout(events.recv()).await.unwrap());
    }
    assert_eq!(seen[0]["type"], "tool_execution_start");
    assert_eq!(seen[0]["toolName"], "read");
    assert_eq!(seen[0]["args"]["path"], "src/main.ts");
    assert_eq!(seen[1]["type"], "message_update");
    assert_eq!(seen[2]["toolName"], "bash");
    assert_eq!(seen[4]["type"], "agent_end");
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn spawn_failure_leaves_bridge_startable() {
    let bridge = Bridge::new("true", Some(std::path::PathBuf::from("/nonexistent-dir-xyz")));
    let err = bridge.start().await.unwrap_err();
    assert!(matches!(err, BridgeError::SpawnFailed(_)));
    assert_eq!(bridge.state(), Lifecycle::Idle);
}
