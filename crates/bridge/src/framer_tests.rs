// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn whole_line_in_one_chunk() {
    let mut framer = LineFramer::new();
    let values = framer.push(b"{\"type\":\"agent_end\"}\n");
    assert_eq!(values, vec![json!({"type": "agent_end"})]);
    assert_eq!(framer.pending_len(), 0);
}

#[test]
fn split_across_chunks() {
    let mut framer = LineFramer::new();
    assert!(framer.push(b"{\"type\":\"agent").is_empty());
    assert!(framer.pending_len() > 0);
    let values = framer.push(b"_start\"}\n{\"a\":1}\n{\"partial");
    assert_eq!(values, vec![json!({"type": "agent_start"}), json!({"a": 1})]);
    assert_eq!(framer.push(b"\":2}\n"), vec![json!({"partial": 2})]);
}

#[test]
fn blank_lines_skipped() {
    let mut framer = LineFramer::new();
    let values = framer.push(b"\n   \n{\"ok\":true}\n\n");
    assert_eq!(values, vec![json!({"ok": true})]);
}

#[test]
fn non_json_dropped_silently() {
    let mut framer = LineFramer::new();
    let values = framer.push(b"warning: something\n{\"ok\":true}\nnot json either\n");
    assert_eq!(values, vec![json!({"ok": true})]);
}

#[test]
fn carriage_returns_trimmed() {
    let mut framer = LineFramer::new();
    let values = framer.push(b"{\"ok\":true}\r\n");
    assert_eq!(values, vec![json!({"ok": true})]);
}

#[test]
fn invalid_utf8_dropped() {
    let mut framer = LineFramer::new();
    let values = framer.push(b"\xff\xfe\n{\"ok\":true}\n");
    assert_eq!(values, vec![json!({"ok": true})]);
}

proptest::proptest! {
    /// However the byte stream is chunked, the framed output is the
    /// same values in the same order.
    #[test]
    fn chunking_is_invisible(cuts in proptest::collection::vec(0usize..200, 0..8)) {
        let input: Vec<u8> = (0..5)
            .flat_map(|i| format!("{{\"seq\":{i}}}\n").into_bytes())
            .collect();

        let mut reference = LineFramer::new();
        let expected = reference.push(&input);

        let mut boundaries: Vec<usize> =
            cuts.into_iter().map(|c| c % (input.len() + 1)).collect();
        boundaries.sort_unstable();
        boundaries.dedup();
        boundaries.push(input.len());

        let mut framer = LineFramer::new();
        let mut produced = Vec::new();
        let mut start = 0;
        for end in boundaries {
            produced.extend(framer.push(&input[start..end]));
            start = end;
        }
        proptest::prop_assert_eq!(produced, expected);
    }
}

#[test]
fn many_lines_single_chunk_in_order() {
    let mut framer = LineFramer::new();
    let mut input = Vec::new();
    for i in 0..10 {
        input.extend_from_slice(format!("{{\"seq\":{i}}}\n").as_bytes());
    }
    let values = framer.push(&input);
    assert_eq!(values.len(), 10);
    assert_eq!(values[9], json!({"seq": 9}));
}
