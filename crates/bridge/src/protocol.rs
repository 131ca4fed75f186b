// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed view of the child RPC protocol.
//!
//! The wire format is newline-delimited JSON in both directions. Events
//! the bridge does not recognize still flow verbatim to subscribers;
//! this module only types the subset the bridge itself interprets.

use serde::Deserialize;
use serde_json::Value;

/// Inbound child → daemon events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// RPC reply, matched to a pending request by id.
    Response {
        id: String,
        success: bool,
        #[serde(default)]
        data: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },

    /// Incremental assistant content for the current turn.
    MessageUpdate {
        #[serde(rename = "assistantMessageEvent")]
        assistant_message_event: AssistantMessageEvent,
    },

    ToolExecutionStart {
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(default)]
        args: Value,
        #[serde(rename = "toolCallId", default)]
        tool_call_id: Option<String>,
    },

    ToolExecutionEnd {
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(rename = "toolCallId", default)]
        tool_call_id: Option<String>,
        #[serde(rename = "isError", default)]
        is_error: bool,
        #[serde(default)]
        result: Option<Value>,
    },

    AgentStart,
    AgentEnd,
    AutoCompactionStart,
    AutoCompactionEnd,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantMessageEvent {
    TextDelta { delta: String },
    ThinkingDelta { delta: String },
}

impl AgentEvent {
    /// Interpret a raw stdout JSON object. `None` for event types the
    /// bridge does not act on (they still reach subscribers verbatim).
    pub fn interpret(value: &Value) -> Option<AgentEvent> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Build an outbound RPC envelope `{id, type, ...params}`.
///
/// `params` must be a JSON object (or null for none); its entries are
/// flattened into the envelope.
pub fn rpc_envelope(id: &str, rpc_type: &str, params: Value) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("id".to_string(), Value::String(id.to_string()));
    map.insert("type".to_string(), Value::String(rpc_type.to_string()));
    if let Value::Object(extra) = params {
        for (key, value) in extra {
            map.insert(key, value);
        }
    }
    Value::Object(map)
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
