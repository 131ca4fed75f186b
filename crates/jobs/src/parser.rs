// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job file parsing: YAML front matter + Markdown body.
//!
//! ```text
//! ---
//! schedule: "0 7 * * *"
//! session: main
//! steps:
//!   - new-session
//!   - model: claude-haiku-4-5
//!   - prompt
//! ---
//! Daily checklist body that becomes the prompt.
//! ```

use crate::job::{JobDefinition, Notify, Step};
use crate::schedule::{Schedule, ScheduleError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("missing front matter (expected leading `---` block)")]
    MissingFrontMatter,

    #[error("invalid front matter: {0}")]
    FrontMatter(#[from] serde_yaml::Error),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("steps must be a non-empty list")]
    EmptySteps,

    #[error("unknown step {0:?}")]
    UnknownStep(String),

    #[error("step mapping must be exactly {{model: \"...\"}}")]
    InvalidStepMapping,

    #[error("a prompt step requires a non-empty body")]
    PromptRequiresBody,

    #[error("invalid session name {0:?} (allowed: [A-Za-z0-9_-])")]
    InvalidSession(String),

    #[error("notify must be a string, \"none\", or false")]
    InvalidNotify,
}

/// Raw front matter as written in the file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FrontMatter {
    schedule: String,
    steps: Vec<RawStep>,
    #[serde(default)]
    notify: Option<serde_yaml::Value>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default, rename = "gracePeriodMs")]
    grace_period_ms: Option<u64>,
    #[serde(default)]
    session: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStep {
    Keyword(String),
    Mapping(BTreeMap<String, String>),
}

/// Derive the job name from a file path.
///
/// With a base dir: the path relative to it, `.md` stripped, separators
/// normalized to `/`. Without one: the file stem.
pub fn job_name_for(path: &Path, base: Option<&Path>) -> String {
    let relative = match base.and_then(|b| path.strip_prefix(b).ok()) {
        Some(rel) => rel,
        None => return path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default(),
    };
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    joined.strip_suffix(".md").map(str::to_string).unwrap_or(joined)
}

/// Parse one job file's contents.
pub fn parse_job_file(
    content: &str,
    path: &Path,
    base: Option<&Path>,
) -> Result<JobDefinition, ParseError> {
    let (front, body) = split_front_matter(content)?;
    let raw: FrontMatter = serde_yaml::from_str(front)?;

    let schedule = Schedule::parse(&raw.schedule)?;

    if raw.steps.is_empty() {
        return Err(ParseError::EmptySteps);
    }
    let steps = raw.steps.iter().map(parse_step).collect::<Result<Vec<_>, _>>()?;

    let body = body.trim().to_string();
    if steps.contains(&Step::Prompt) && body.is_empty() {
        return Err(ParseError::PromptRequiresBody);
    }

    if let Some(session) = &raw.session {
        let valid = !session.is_empty()
            && session.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ParseError::InvalidSession(session.clone()));
        }
    }

    Ok(JobDefinition {
        name: job_name_for(path, base),
        file_path: path.to_path_buf(),
        schedule,
        steps,
        notify: parse_notify(raw.notify.as_ref())?,
        enabled: raw.enabled.unwrap_or(true),
        grace_period_ms: raw.grace_period_ms,
        session: raw.session,
        body,
    })
}

/// Split `---` fenced front matter from the body.
fn split_front_matter(content: &str) -> Result<(&str, &str), ParseError> {
    let rest = content.strip_prefix("---").ok_or(ParseError::MissingFrontMatter)?;
    let rest = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix("\n")).unwrap_or(rest);
    // Find the closing fence on its own line.
    let mut offset = 0usize;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let front = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Ok((front, body));
        }
        offset += line.len();
    }
    Err(ParseError::MissingFrontMatter)
}

fn parse_step(raw: &RawStep) -> Result<Step, ParseError> {
    match raw {
        RawStep::Keyword(word) => match word.as_str() {
            "new-session" => Ok(Step::NewSession),
            "compact" => Ok(Step::Compact),
            "prompt" => Ok(Step::Prompt),
            "reload" => Ok(Step::Reload),
            other => Err(ParseError::UnknownStep(other.to_string())),
        },
        RawStep::Mapping(map) => {
            if map.len() == 1 {
                if let Some(model) = map.get("model") {
                    return Ok(Step::Model(model.clone()));
                }
            }
            Err(ParseError::InvalidStepMapping)
        }
    }
}

fn parse_notify(raw: Option<&serde_yaml::Value>) -> Result<Notify, ParseError> {
    match raw {
        None | Some(serde_yaml::Value::Null) => Ok(Notify::Inherit),
        Some(serde_yaml::Value::Bool(false)) => Ok(Notify::None),
        Some(serde_yaml::Value::String(s)) if s == "none" => Ok(Notify::None),
        Some(serde_yaml::Value::String(s)) if !s.is_empty() => Ok(Notify::Room(s.clone())),
        _ => Err(ParseError::InvalidNotify),
    }
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
