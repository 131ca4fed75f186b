// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scriptable fake bridge for daemon tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use sb_bridge::{AgentBridge, BridgeError, Lifecycle, ToolStart, TurnHooks};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// One scripted mid-turn event replayed through the turn hooks.
#[derive(Clone)]
pub enum TurnEvent {
    Tool { name: String, args: Value },
    Text(String),
}

/// In-memory bridge double: records every interaction, replays scripted
/// turn events, and answers RPCs from a canned table.
pub struct FakeBridge {
    state: Mutex<Lifecycle>,
    busy: Mutex<bool>,
    pub rpcs: Mutex<Vec<(String, Value)>>,
    pub messages: Mutex<Vec<String>>,
    pub steers: Mutex<Vec<String>>,
    rpc_responses: Mutex<HashMap<String, Value>>,
    rpc_errors: Mutex<HashMap<String, String>>,
    turn_events: Mutex<Vec<TurnEvent>>,
    message_response: Mutex<String>,
    start_error: Mutex<Option<BridgeError>>,
    start_delay: Mutex<Option<std::time::Duration>>,
    stop_calls: Mutex<u32>,
    subscribers: Mutex<Vec<mpsc::Sender<Value>>>,
    exited_tx: watch::Sender<bool>,
    exited_rx: watch::Receiver<bool>,
}

impl Default for FakeBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBridge {
    pub fn new() -> Self {
        let (exited_tx, exited_rx) = watch::channel(false);
        Self {
            state: Mutex::new(Lifecycle::Idle),
            busy: Mutex::new(false),
            rpcs: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            steers: Mutex::new(Vec::new()),
            rpc_responses: Mutex::new(HashMap::new()),
            rpc_errors: Mutex::new(HashMap::new()),
            turn_events: Mutex::new(Vec::new()),
            message_response: Mutex::new(String::new()),
            start_error: Mutex::new(None),
            start_delay: Mutex::new(None),
            stop_calls: Mutex::new(0),
            subscribers: Mutex::new(Vec::new()),
            exited_tx,
            exited_rx,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_busy(&self, busy: bool) {
        *self.busy.lock() = busy;
    }

    /// Canned data for a successful RPC of `rpc_type`.
    pub fn respond_to(&self, rpc_type: &str, data: Value) {
        self.rpc_responses.lock().insert(rpc_type.to_string(), data);
    }

    /// Make an RPC of `rpc_type` fail.
    pub fn fail_rpc(&self, rpc_type: &str, error: &str) {
        self.rpc_errors.lock().insert(rpc_type.to_string(), error.to_string());
    }

    /// Script the mid-turn events replayed on the next `send_message`.
    pub fn script_turn(&self, events: Vec<TurnEvent>, response: &str) {
        *self.turn_events.lock() = events;
        *self.message_response.lock() = response.to_string();
    }

    pub fn fail_start(&self, error: BridgeError) {
        *self.start_error.lock() = Some(error);
    }

    pub fn delay_start(&self, delay: std::time::Duration) {
        *self.start_delay.lock() = Some(delay);
    }

    pub fn stop_calls(&self) -> u32 {
        *self.stop_calls.lock()
    }

    /// Simulate an unsolicited child exit.
    pub fn trigger_exit(&self) {
        *self.state.lock() = Lifecycle::Exited;
        let _ = self.exited_tx.send(true);
    }

    /// Publish a raw event to all subscribers, as the child would.
    pub fn emit(&self, value: Value) {
        let subscribers = self.subscribers.lock();
        for tx in subscribers.iter() {
            let _ = tx.try_send(value.clone());
        }
    }

    pub fn rpc_types(&self) -> Vec<String> {
        self.rpcs.lock().iter().map(|(t, _)| t.clone()).collect()
    }
}

#[async_trait]
impl AgentBridge for FakeBridge {
    async fn start(&self) -> Result<(), BridgeError> {
        let delay = *self.start_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.start_error.lock().take() {
            return Err(error);
        }
        let mut state = self.state.lock();
        match *state {
            Lifecycle::Idle => {
                *state = Lifecycle::Running;
                Ok(())
            }
            Lifecycle::Running => Err(BridgeError::AlreadyStarted),
            Lifecycle::Exited => Err(BridgeError::ChildExited),
        }
    }

    async fn send_message(&self, text: &str, hooks: TurnHooks) -> Result<String, BridgeError> {
        if *self.state.lock() == Lifecycle::Exited {
            return Err(BridgeError::ChildExited);
        }
        self.messages.lock().push(text.to_string());
        let events = self.turn_events.lock().clone();
        for event in events {
            match event {
                TurnEvent::Tool { name, args } => {
                    if let Some(hook) = &hooks.on_tool_start {
                        hook(&ToolStart { tool_name: name, args });
                    }
                }
                TurnEvent::Text(delta) => {
                    if let Some(hook) = &hooks.on_text {
                        hook(&delta);
                    }
                }
            }
        }
        Ok(self.message_response.lock().clone())
    }

    fn steer(&self, text: &str) {
        self.steers.lock().push(text.to_string());
    }

    async fn command(&self, rpc_type: &str, params: Value) -> Result<Value, BridgeError> {
        if *self.state.lock() == Lifecycle::Exited {
            return Err(BridgeError::ChildExited);
        }
        self.rpcs.lock().push((rpc_type.to_string(), params));
        if let Some(error) = self.rpc_errors.lock().get(rpc_type) {
            return Err(BridgeError::Rpc(error.clone()));
        }
        Ok(self
            .rpc_responses
            .lock()
            .get(rpc_type)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn stop(&self) -> Result<(), BridgeError> {
        *self.stop_calls.lock() += 1;
        *self.state.lock() = Lifecycle::Exited;
        let _ = self.exited_tx.send(true);
        Ok(())
    }

    fn busy(&self) -> bool {
        *self.busy.lock()
    }

    fn state(&self) -> Lifecycle {
        *self.state.lock()
    }

    fn subscribe(&self) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(256);
        self.subscribers.lock().push(tx);
        rx
    }

    async fn wait_exited(&self) {
        let mut rx = self.exited_rx.clone();
        let _ = rx.wait_for(|v| *v).await;
    }
}

/// Factory handing out pre-built fakes by session name, recording how
/// many bridges were created.
pub struct FakeBridgeFactory {
    bridges: Mutex<HashMap<String, Arc<FakeBridge>>>,
    pub created: Mutex<u32>,
}

impl Default for FakeBridgeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBridgeFactory {
    pub fn new() -> Self {
        Self { bridges: Mutex::new(HashMap::new()), created: Mutex::new(0) }
    }

    /// Register the fake returned for `name`. Unregistered names get a
    /// fresh default fake.
    pub fn provide(&self, name: &str, bridge: Arc<FakeBridge>) {
        self.bridges.lock().insert(name.to_string(), bridge);
    }

    pub fn created(&self) -> u32 {
        *self.created.lock()
    }
}

impl crate::sessions::BridgeFactory for FakeBridgeFactory {
    fn create(
        &self,
        name: &str,
        _config: &sb_core::config::SessionConfig,
    ) -> Arc<dyn AgentBridge> {
        *self.created.lock() += 1;
        let bridge =
            self.bridges.lock().entry(name.to_string()).or_insert_with(FakeBridge::arc).clone();
        bridge
    }
}
