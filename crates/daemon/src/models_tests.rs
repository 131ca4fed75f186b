// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn catalog() -> Vec<ModelEntry> {
    parse_models(&json!({
        "models": [
            {"id": "claude-sonnet-4-5", "name": "Claude Sonnet 4.5", "provider": "anthropic"},
            {"id": "claude-haiku-4-5", "name": "Claude Haiku 4.5", "provider": "anthropic"},
            {"id": "gpt-4o", "name": "GPT-4o", "provider": "openai"},
        ]
    }))
}

#[test]
fn parse_wrapped_and_bare_arrays() {
    assert_eq!(catalog().len(), 3);
    let bare = parse_models(&json!([{"id": "m1"}]));
    assert_eq!(bare.len(), 1);
    assert_eq!(bare[0].name, "m1");
}

#[test]
fn parse_tolerates_garbage() {
    assert!(parse_models(&json!(null)).is_empty());
    assert!(parse_models(&json!({"models": "nope"})).is_empty());
    assert_eq!(parse_models(&json!([{"id": "ok"}, {"name": "no id"}])).len(), 1);
}

#[yare::parameterized(
    by_id_fragment   = { "haiku", "claude-haiku-4-5" },
    by_name          = { "Sonnet", "claude-sonnet-4-5" },
    case_insensitive = { "HAIKU", "claude-haiku-4-5" },
    by_provider_path = { "openai/gpt", "gpt-4o" },
)]
fn matching(query: &str, expected_id: &str) {
    let models = catalog();
    assert_eq!(match_model(&models, query).unwrap().id, expected_id);
}

#[test]
fn first_match_wins() {
    let models = catalog();
    assert_eq!(match_model(&models, "claude").unwrap().id, "claude-sonnet-4-5");
}

#[test]
fn no_match_is_none() {
    assert!(match_model(&catalog(), "gemini").is_none());
}

#[test]
fn list_formatting() {
    let list = format_model_list(&catalog());
    assert!(list.starts_with("Available models:"));
    assert!(list.contains("claude-haiku-4-5"));
    assert_eq!(format_model_list(&[]), "No models available.");
}
