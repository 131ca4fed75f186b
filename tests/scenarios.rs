// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios: real bridges over scripted shell children,
//! driven through the daemon's router and session manager.

use sb_core::SystemClock;
use sb_daemon::listener::fake::FakeListener;
use sb_daemon::sessions::ProcessBridgeFactory;
use sb_daemon::{IncomingMessage, Listener, ListenerSet, Router, SessionManager};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    router: Arc<Router<SystemClock>>,
    sessions: SessionManager,
    listener: Arc<FakeListener>,
}

fn harness(agent_command: &str) -> Harness {
    let yaml = format!(
        r#"
agent:
  command: {}
security:
  allowed_users: ["@w:a"]
sessions:
  default: main
"#,
        serde_json::to_string(agent_command).unwrap()
    );
    let config: Arc<sb_core::Config> = Arc::new(serde_yaml::from_str(&yaml).unwrap());
    let sessions = SessionManager::new(Arc::clone(&config), Arc::new(ProcessBridgeFactory));
    let listener = Arc::new(FakeListener::new("matrix"));
    let listeners = ListenerSet::new(vec![Arc::clone(&listener) as Arc<dyn Listener>]);
    let router = Arc::new(Router::new(config, sessions.clone(), listeners, SystemClock));
    Harness { router, sessions, listener }
}

fn message(text: &str) -> IncomingMessage {
    IncomingMessage {
        platform: "matrix".into(),
        channel: "#g".into(),
        sender: "@w:a".into(),
        text: text.into(),
    }
}

#[tokio::test]
async fn scenario_full_turn_with_tool_summaries() {
    let h = harness(&sb_bridge::testing::full_turn_agent());

    h.router.handle_message(message("hey")).await;

    assert_eq!(
        h.listener.texts(),
        vec!["📖 Reading `src/main.ts`", "⚡ `npm test`", "All tests pass!"]
    );
    h.sessions.stop_all().await;
}

#[tokio::test]
async fn scenario_unauthorized_sender_is_silent() {
    let h = harness(&sb_bridge::testing::full_turn_agent());

    h.router
        .handle_message(IncomingMessage {
            platform: "matrix".into(),
            channel: "#g".into(),
            sender: "@s:evil".into(),
            text: "hey".into(),
        })
        .await;

    assert!(h.listener.texts().is_empty());
    // No session was ever started, so no RPC could have been written.
    assert!(h.sessions.running_sessions().is_empty());
}

#[tokio::test]
async fn scenario_rate_limit_allows_ten() {
    let h = harness(&sb_bridge::testing::counting_turn_agent());

    for _ in 0..11 {
        h.router.handle_message(message("ping")).await;
    }

    // Ten turns produced replies; the eleventh was dropped.
    let texts = h.listener.texts();
    assert_eq!(texts.len(), 10);
    assert_eq!(texts[0], "reply 1");
    assert_eq!(texts[9], "reply 10");
    h.sessions.stop_all().await;
}

#[tokio::test]
async fn scenario_busy_bridge_gets_steered() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("received.txt");
    let h = harness(&sb_bridge::testing::recording_agent(&log));

    // First message opens a turn that never completes.
    let first = {
        let router = Arc::clone(&h.router);
        let msg = message("first");
        tokio::spawn(async move { router.handle_message(msg).await })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Second message steers instead of queueing a second turn.
    h.router.handle_message(message("second")).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let received = std::fs::read_to_string(&log).unwrap();
    let follow_ups: Vec<&str> =
        received.lines().filter(|l| l.contains("follow_up")).collect();
    assert_eq!(follow_ups.len(), 2);
    assert!(follow_ups[1].contains("[matrix #g] @w:a: second"));
    // No reply was produced for either message yet.
    assert!(h.listener.texts().is_empty());

    h.sessions.stop_all().await;
    let _ = first.await;
}
