// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::listener::fake::FakeListener;
use crate::sessions::{BridgeFactory, SessionManager};
use crate::testkit::{FakeBridge, FakeBridgeFactory, TurnEvent};
use sb_core::FakeClock;
use serde_json::json;

struct Harness {
    router: Router<FakeClock>,
    bridge: Arc<FakeBridge>,
    listener: Arc<FakeListener>,
    clock: FakeClock,
}

fn harness() -> Harness {
    let config: Arc<Config> = Arc::new(
        serde_yaml::from_str(
            r#"
agent:
  command: "pi --mode rpc"
security:
  allowed_users: ["@w:a"]
sessions:
  default: main
"#,
        )
        .unwrap(),
    );
    let factory = Arc::new(FakeBridgeFactory::new());
    let bridge = FakeBridge::arc();
    factory.provide("main", Arc::clone(&bridge));
    let sessions =
        SessionManager::new(Arc::clone(&config), Arc::clone(&factory) as Arc<dyn BridgeFactory>);
    let listener = Arc::new(FakeListener::new("matrix"));
    let listeners = ListenerSet::new(vec![Arc::clone(&listener) as Arc<dyn crate::Listener>]);
    let clock = FakeClock::new();
    let router = Router::new(config, sessions, listeners, clock.clone());
    Harness { router, bridge, listener, clock }
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
async fn full_turn_summaries_then_response() {
    let h = harness();
    h.bridge.script_turn(
        vec![
            TurnEvent::Tool { name: "read".into(), args: json!({"path": "src/main.ts"}) },
            TurnEvent::Tool { name: "bash".into(), args: json!({"command": "npm test"}) },
        ],
        "All tests pass!",
    );

    h.router.handle_message(message("hey")).await;

    assert_eq!(
        h.listener.texts(),
        vec!["📖 Reading `src/main.ts`", "⚡ `npm test`", "All tests pass!"]
    );
    assert_eq!(*h.bridge.messages.lock(), vec!["[matrix #g] @w:a: hey"]);
}

#[tokio::test]
async fn unauthorized_sender_gets_nothing() {
    let h = harness();
    let msg = IncomingMessage {
        platform: "matrix".into(),
        channel: "#g".into(),
        sender: "@s:evil".into(),
        text: "hey".into(),
    };
    h.router.handle_message(msg).await;

    assert!(h.listener.texts().is_empty());
    assert!(h.bridge.messages.lock().is_empty());
    assert!(h.bridge.rpcs.lock().is_empty());
}

#[tokio::test]
async fn message_length_boundary() {
    let h = harness();
    h.router.handle_message(message(&"x".repeat(4000))).await;
    assert_eq!(h.bridge.messages.lock().len(), 1);

    h.router.handle_message(message(&"x".repeat(4001))).await;
    assert_eq!(h.bridge.messages.lock().len(), 1);
}

#[tokio::test]
async fn eleventh_message_in_window_dropped() {
    let h = harness();
    for _ in 0..11 {
        h.router.handle_message(message("spam")).await;
    }
    assert_eq!(h.bridge.messages.lock().len(), 10);

    // Window slides: a minute later traffic flows again.
    h.clock.advance_secs(60);
    h.router.handle_message(message("back")).await;
    assert_eq!(h.bridge.messages.lock().len(), 11);
}

#[tokio::test]
async fn busy_bridge_steers_without_new_turn() {
    let h = harness();
    h.bridge.set_busy(true);

    h.router.handle_message(message("hey")).await;

    assert_eq!(*h.bridge.steers.lock(), vec!["[matrix #g] @w:a: hey"]);
    assert!(h.bridge.messages.lock().is_empty());
    assert!(h.listener.texts().is_empty());
}

#[tokio::test]
async fn listener_failures_are_swallowed() {
    let h = harness();
    *h.listener.fail_sends.lock() = true;
    h.bridge.script_turn(
        vec![TurnEvent::Tool { name: "bash".into(), args: json!({"command": "ls"}) }],
        "done",
    );

    // Must not error or panic; the turn still runs.
    h.router.handle_message(message("hey")).await;
    assert_eq!(h.bridge.messages.lock().len(), 1);
}

#[tokio::test]
async fn unknown_slash_falls_through_as_message() {
    let h = harness();
    h.router.handle_message(message("/frobnicate now")).await;
    assert_eq!(*h.bridge.messages.lock(), vec!["[matrix #g] @w:a: /frobnicate now"]);
}

#[tokio::test]
async fn abort_is_case_insensitive() {
    let h = harness();
    h.router.handle_message(message("/ABORT")).await;
    assert_eq!(h.bridge.rpc_types(), vec!["abort"]);
    assert_eq!(h.listener.texts(), vec!["⏹️ Aborted."]);
}

#[tokio::test]
async fn compress_with_instructions() {
    let h = harness();
    h.bridge.respond_to("compact", json!({"tokensBefore": 181000}));

    h.router.handle_message(message("/compress keep the design notes")).await;

    let rpcs = h.bridge.rpcs.lock().clone();
    assert_eq!(rpcs.len(), 1);
    assert_eq!(rpcs[0].0, "compact");
    assert_eq!(rpcs[0].1, json!({"customInstructions": "keep the design notes"}));
    assert_eq!(
        h.listener.texts(),
        vec!["🗜️ Compressing context...", "✅ Compressed. Tokens before: 181000"]
    );
}

#[tokio::test]
async fn new_session_command() {
    let h = harness();
    h.router.handle_message(message("/new")).await;
    assert_eq!(h.bridge.rpc_types(), vec!["new_session"]);
    assert_eq!(h.listener.texts(), vec!["🆕 Started a new session."]);
}

#[tokio::test]
async fn reload_replies_with_agent_response() {
    let h = harness();
    h.bridge.script_turn(vec![], "runtime reloaded");
    h.router.handle_message(message("/reload")).await;
    assert_eq!(*h.bridge.messages.lock(), vec!["/reload-runtime"]);
    assert_eq!(h.listener.texts(), vec!["runtime reloaded"]);
}

#[tokio::test]
async fn model_without_args_lists() {
    let h = harness();
    h.bridge.respond_to(
        "get_available_models",
        json!({"models": [{"id": "claude-haiku-4-5", "name": "Claude Haiku 4.5"}]}),
    );
    h.router.handle_message(message("/model")).await;
    let texts = h.listener.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("Available models:"));
    assert!(texts[0].contains("claude-haiku-4-5"));
}

#[tokio::test]
async fn model_with_args_switches() {
    let h = harness();
    h.bridge.respond_to(
        "get_available_models",
        json!({"models": [
            {"id": "claude-sonnet-4-5", "name": "Claude Sonnet 4.5"},
            {"id": "claude-haiku-4-5", "name": "Claude Haiku 4.5"},
        ]}),
    );
    h.router.handle_message(message("/model HAIKU")).await;

    let rpcs = h.bridge.rpcs.lock().clone();
    assert_eq!(rpcs[1].0, "set_model");
    assert_eq!(rpcs[1].1, json!({"modelId": "claude-haiku-4-5"}));
    assert_eq!(h.listener.texts(), vec!["✅ Model set to claude-haiku-4-5"]);
}

#[tokio::test]
async fn model_with_no_match_reports() {
    let h = harness();
    h.bridge.respond_to("get_available_models", json!({"models": [{"id": "m1"}]}));
    h.router.handle_message(message("/model gemini")).await;
    assert_eq!(h.listener.texts(), vec!["⚠️ No model matching \"gemini\""]);
    assert_eq!(h.bridge.rpc_types(), vec!["get_available_models"]);
}

#[tokio::test]
async fn webhook_reply_and_queue() {
    let h = harness();
    h.bridge.script_turn(vec![], "ack");

    let outcome = h.router.handle_webhook("deploy done", "ci", None, None).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Reply("ack".into()));
    assert_eq!(*h.bridge.messages.lock(), vec!["[webhook ci] deploy done"]);

    h.bridge.set_busy(true);
    let outcome = h.router.handle_webhook("again", "ci", None, None).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Queued);
    assert_eq!(*h.bridge.steers.lock(), vec!["[webhook ci] again"]);
}

#[tokio::test]
async fn webhook_notify_pushes_reply_to_room() {
    let h = harness();
    h.bridge.script_turn(vec![], "ack");

    let outcome =
        h.router.handle_webhook("deploy", "ci", None, Some("#ops")).await.unwrap();

    assert_eq!(outcome, WebhookOutcome::Reply("ack".into()));
    let sent = h.listener.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.platform, "matrix");
    assert_eq!(sent[0].0.channel, "#ops");
    assert_eq!(sent[0].1, "ack");
}

#[tokio::test]
async fn interaction_probe_tracks_traffic() {
    let h = harness();
    let probe = h.router.interaction_probe();
    assert!(probe().is_none());
    h.router.handle_message(message("hey")).await;
    assert!(probe().is_some());
}

#[yare::parameterized(
    read_with_path  = { "read", json!({"path": "src/main.ts"}), "📖 Reading `src/main.ts`" },
    read_no_path    = { "read", json!({}), "📖 Reading `file`" },
    edit            = { "edit", json!({"path": "a.rs"}), "✏️ Editing `a.rs`" },
    write           = { "write", json!({"path": "b.rs"}), "📝 Writing `b.rs`" },
    bash            = { "bash", json!({"command": "npm test"}), "⚡ `npm test`" },
    bash_first_line = { "bash", json!({"command": "ls\nrm -rf /"}), "⚡ `ls`" },
    other           = { "grep", json!({}), "🔧 grep" },
)]
fn tool_summaries(tool: &str, args: serde_json::Value, expected: &str) {
    assert_eq!(tool_summary(tool, &args), expected);
}

#[test]
fn bash_summary_truncates_codepoint_safe() {
    let command = "é".repeat(100);
    let summary = tool_summary("bash", &json!({"command": command}));
    let expected = format!("⚡ `{}…`", "é".repeat(80));
    assert_eq!(summary, expected);

    // Exactly at the cap: no ellipsis.
    let command = "x".repeat(80);
    let summary = tool_summary("bash", &json!({"command": command}));
    assert_eq!(summary, format!("⚡ `{command}`"));
}
