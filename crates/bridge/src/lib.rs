// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sb-bridge: supervisor for one agent child process.
//!
//! The bridge owns the child's lifecycle and speaks newline-delimited
//! JSON over its stdin/stdout: request/response RPC by id, an ordered
//! stream of agent events, and a FIFO queue of turn-scoped text waiters.

pub mod bridge;
pub mod framer;
pub mod protocol;
pub mod testing;

pub use bridge::{AgentBridge, Bridge, BridgeError, Lifecycle, ToolStart, TurnHooks};
pub use framer::LineFramer;
pub use protocol::{rpc_envelope, AgentEvent, AssistantMessageEvent};
