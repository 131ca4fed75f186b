// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted fake agents for tests.
//!
//! Each helper returns a `sh -c` command line implementing just enough
//! of the child protocol for one test shape. Real protocol behavior is
//! exercised end to end: the scripts read stdin line by line and write
//! newline-delimited JSON to stdout.

/// Agent that answers every RPC line with a successful response echoing
/// the request id.
pub fn rpc_echo_agent() -> String {
    r#"while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  printf '{"type":"response","id":"%s","success":true,"data":{"ok":true}}\n' "$id"
done"#
        .to_string()
}

/// Agent that answers every RPC with a failed response.
pub fn rpc_error_agent(message: &str) -> String {
    format!(
        r#"while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  printf '{{"type":"response","id":"%s","success":false,"error":"{message}"}}\n' "$id"
done"#
    )
}

/// Agent that runs one numbered turn per `follow_up`: a text delta
/// `reply N` followed by `agent_end`.
pub fn counting_turn_agent() -> String {
    r#"i=0
while IFS= read -r line; do
  case "$line" in
    *follow_up*)
      i=$((i+1))
      printf '{"type":"message_update","assistantMessageEvent":{"type":"text_delta","delta":"reply %s"}}\n' "$i"
      printf '{"type":"agent_end"}\n'
      ;;
  esac
done"#
        .to_string()
}

/// Agent that, for each `follow_up`, emits two tool starts, a text
/// delta, and `agent_end`: the canonical full-turn shape.
pub fn full_turn_agent() -> String {
    r#"while IFS= read -r line; do
  case "$line" in
    *follow_up*)
      printf '{"type":"tool_execution_start","toolName":"read","args":{"path":"src/main.ts"}}\n'
      printf '{"type":"message_update","assistantMessageEvent":{"type":"text_delta","delta":"  All tests"}}\n'
      printf '{"type":"tool_execution_start","toolName":"bash","args":{"command":"npm test"}}\n'
      printf '{"type":"message_update","assistantMessageEvent":{"type":"text_delta","delta":" pass!  "}}\n'
      printf '{"type":"agent_end"}\n'
      ;;
  esac
done"#
        .to_string()
}

/// Agent that consumes stdin and never responds. Turns stay pending
/// until the bridge is stopped.
pub fn silent_agent() -> String {
    "cat > /dev/null".to_string()
}

/// Agent that appends every received line to `path` and never responds.
pub fn recording_agent(path: &std::path::Path) -> String {
    format!(
        r#"while IFS= read -r line; do printf '%s\n' "$line" >> {}; done"#,
        path.display()
    )
}

/// Agent that exits with `code` as soon as it has read one line.
pub fn exit_after_first_line_agent(code: i32) -> String {
    format!("IFS= read -r line; exit {code}")
}
