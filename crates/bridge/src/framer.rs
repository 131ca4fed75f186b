// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Newline framing for the child's stdout.
//!
//! Bytes arrive in arbitrary chunks; complete lines are parsed as JSON.
//! Blank lines and lines that are not valid JSON are dropped silently:
//! the protocol tolerates interleaved noise on stdout from a misbehaving
//! child.

use serde_json::Value;

/// Incremental line framer with a residual partial-line buffer.
#[derive(Debug, Default)]
pub struct LineFramer {
    residual: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the JSON values for every complete line it
    /// finishes, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.residual.extend_from_slice(chunk);
        let mut values = Vec::new();
        while let Some(pos) = self.residual.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.residual.drain(..=pos).collect();
            if let Some(value) = parse_line(&line[..line.len() - 1]) {
                values.push(value);
            }
        }
        values
    }

    /// Bytes currently buffered without a terminating newline.
    pub fn pending_len(&self) -> usize {
        self.residual.len()
    }
}

fn parse_line(raw: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(raw).ok()?;
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    serde_json::from_str(text).ok()
}

#[cfg(test)]
#[path = "framer_tests.rs"]
mod tests;
