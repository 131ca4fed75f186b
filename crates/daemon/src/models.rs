// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Model catalog handling shared by the `/model` slash command and the
//! scheduler's `model` step.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEntry {
    pub id: String,
    pub name: String,
    pub provider: Option<String>,
}

/// Parse the `get_available_models` response. Accepts either a bare
/// array or `{"models": [...]}`.
pub fn parse_models(data: &Value) -> Vec<ModelEntry> {
    let items = match data {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("models") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    items
        .iter()
        .filter_map(|item| {
            let id = item.get("id")?.as_str()?.to_string();
            let name = item
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or(&id)
                .to_string();
            let provider =
                item.get("provider").and_then(|v| v.as_str()).map(str::to_string);
            Some(ModelEntry { id, name, provider })
        })
        .collect()
}

/// Case-insensitive substring match across `id`, `name`, and
/// `provider/id`. First match wins.
pub fn match_model<'a>(models: &'a [ModelEntry], query: &str) -> Option<&'a ModelEntry> {
    let query = query.to_lowercase();
    models.iter().find(|m| {
        if m.id.to_lowercase().contains(&query) || m.name.to_lowercase().contains(&query) {
            return true;
        }
        match &m.provider {
            Some(provider) => {
                format!("{}/{}", provider, m.id).to_lowercase().contains(&query)
            }
            None => false,
        }
    })
}

/// Human list for the `/model` reply.
pub fn format_model_list(models: &[ModelEntry]) -> String {
    if models.is_empty() {
        return "No models available.".to_string();
    }
    let mut out = String::from("Available models:");
    for model in models {
        out.push_str("\n• ");
        out.push_str(&model.id);
        if model.name != model.id {
            out.push_str(" — ");
            out.push_str(&model.name);
        }
    }
    out
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
