// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Attach endpoint: WebSocket RPC pass-through + event mirror.
//!
//! Clients authenticate with their first frame, `{type:"auth", token}`;
//! anything else closes the socket with a 1008 "Unauthorized". After
//! auth, request frames `{id, type, ...params}` are forwarded to the
//! RPC handler with the `id` stripped, and every bridge event is
//! broadcast to all authenticated sockets through per-socket queues so
//! one slow client cannot stall the rest.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long a fresh socket gets to present its auth frame.
const AUTH_DEADLINE: Duration = Duration::from_secs(10);

/// Close code for failed auth (policy violation).
const CLOSE_UNAUTHORIZED: u16 = 1008;

/// Close code for server shutdown (going away).
const CLOSE_GOING_AWAY: u16 = 1001;

/// RPC sink behind the attach endpoint. Receives `{type, ...params}`.
#[async_trait]
pub trait AttachRpc: Send + Sync {
    async fn handle(&self, request: Value) -> Result<Value, String>;
}

#[derive(Clone)]
pub struct AttachState {
    token: Option<String>,
    rpc: Arc<dyn AttachRpc>,
    clients: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>>,
}

impl AttachState {
    pub fn new(token: Option<String>, rpc: Arc<dyn AttachRpc>) -> Self {
        Self { token, rpc, clients: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Serialize once, enqueue for every authenticated socket.
    pub fn broadcast(&self, event: &Value) {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "unserializable broadcast event dropped");
                return;
            }
        };
        let mut clients = self.clients.lock();
        clients.retain(|tx| tx.send(Message::Text(text.clone().into())).is_ok());
    }

    /// Close every socket with 1001 "Server shutting down".
    pub fn shutdown(&self) {
        let mut clients = self.clients.lock();
        for tx in clients.drain(..) {
            let _ = tx.send(Message::Close(Some(CloseFrame {
                code: CLOSE_GOING_AWAY,
                reason: "Server shutting down".into(),
            })));
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub(crate) async fn run_socket(&self, socket: WebSocket) {
        handle_socket(socket, self.clone()).await;
    }
}

async fn handle_socket(mut socket: WebSocket, state: AttachState) {
    if !authenticate(&mut socket, &state).await {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_UNAUTHORIZED,
                reason: "Unauthorized".into(),
            })))
            .await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.clients.lock().push(tx.clone());

    use futures_util::{SinkExt, StreamExt};
    let (mut sink, mut stream) = socket.split();

    // Single writer per socket: broadcasts and RPC replies both flow
    // through the queue.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                let reply = handle_frame(text.as_str(), &state).await;
                if tx.send(Message::Text(reply.to_string().into())).is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            // Ping/pong handled by axum; binary frames ignored.
            _ => {}
        }
    }

    writer.abort();
}

/// First-message auth. Any parse failure, wrong type, or token
/// mismatch fails closed.
async fn authenticate(socket: &mut WebSocket, state: &AttachState) -> bool {
    let Some(expected) = state.token.as_deref() else {
        tracing::warn!("attach rejected: no token configured");
        return false;
    };
    let first = tokio::time::timeout(AUTH_DEADLINE, socket.recv()).await;
    let Ok(Some(Ok(Message::Text(text)))) = first else {
        return false;
    };
    let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
        return false;
    };
    frame.get("type").and_then(|v| v.as_str()) == Some("auth")
        && frame.get("token").and_then(|v| v.as_str()) == Some(expected)
}

/// One request frame in, one response frame out.
async fn handle_frame(text: &str, state: &AttachState) -> Value {
    let Ok(mut frame) = serde_json::from_str::<Value>(text) else {
        return json!({"type": "response", "success": false, "error": "invalid JSON"});
    };
    let id = frame.get("id").cloned().unwrap_or(Value::Null);

    let Some(object) = frame.as_object_mut() else {
        return json!({"id": id, "type": "response", "success": false, "error": "expected an object"});
    };
    object.remove("id");
    if !object.get("type").map(|t| t.is_string()).unwrap_or(false) {
        return json!({"id": id, "type": "response", "success": false, "error": "missing type"});
    }

    match state.rpc.handle(Value::Object(object.clone())).await {
        Ok(data) => json!({"id": id, "type": "response", "success": true, "data": data}),
        Err(error) => json!({"id": id, "type": "response", "success": false, "error": error}),
    }
}

#[cfg(test)]
#[path = "attach_tests.rs"]
mod tests;
