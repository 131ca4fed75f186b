// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::path::PathBuf;

const MORNING: &str = r#"---
schedule: "0 7 * * *"
session: main
steps:
  - new-session
  - model: claude-haiku-4-5
  - prompt
---
Daily checklist body that becomes the prompt.
"#;

fn parse(content: &str) -> Result<JobDefinition, ParseError> {
    parse_job_file(content, Path::new("/crons/morning.md"), Some(Path::new("/crons")))
}

#[test]
fn parse_full_job() {
    let job = parse(MORNING).unwrap();
    assert_eq!(job.name, "morning");
    assert_eq!(job.schedule.as_str(), "0 7 * * *");
    assert_eq!(
        job.steps,
        vec![Step::NewSession, Step::Model("claude-haiku-4-5".into()), Step::Prompt]
    );
    assert_eq!(job.session.as_deref(), Some("main"));
    assert_eq!(job.notify, Notify::Inherit);
    assert!(job.enabled);
    assert_eq!(job.body, "Daily checklist body that becomes the prompt.");
}

#[test]
fn missing_front_matter() {
    let err = parse("just a body\n").unwrap_err();
    assert!(matches!(err, ParseError::MissingFrontMatter));
}

#[test]
fn unterminated_front_matter() {
    let err = parse("---\nschedule: \"* * * * *\"\n").unwrap_err();
    assert!(matches!(err, ParseError::MissingFrontMatter));
}

#[test]
fn schedule_must_be_five_fields() {
    let err = parse("---\nschedule: \"0 0 7 * * *\"\nsteps: [compact]\n---\n").unwrap_err();
    assert!(matches!(err, ParseError::Schedule(ScheduleError::FieldCount(6))));
}

#[test]
fn steps_must_be_non_empty() {
    let err = parse("---\nschedule: \"* * * * *\"\nsteps: []\n---\n").unwrap_err();
    assert!(matches!(err, ParseError::EmptySteps));
}

#[test]
fn unknown_step_keyword() {
    let err = parse("---\nschedule: \"* * * * *\"\nsteps: [explode]\n---\n").unwrap_err();
    assert!(matches!(err, ParseError::UnknownStep(word) if word == "explode"));
}

#[test]
fn step_mapping_must_be_model() {
    let err =
        parse("---\nschedule: \"* * * * *\"\nsteps:\n  - voice: loud\n---\n").unwrap_err();
    assert!(matches!(err, ParseError::InvalidStepMapping));
}

#[test]
fn prompt_step_requires_body() {
    let err = parse("---\nschedule: \"* * * * *\"\nsteps: [prompt]\n---\n   \n").unwrap_err();
    assert!(matches!(err, ParseError::PromptRequiresBody));
}

#[test]
fn promptless_job_may_have_empty_body() {
    let job = parse("---\nschedule: \"* * * * *\"\nsteps: [compact]\n---\n").unwrap();
    assert_eq!(job.body, "");
}

#[yare::parameterized(
    word_none   = { "notify: none", Notify::None },
    bool_false  = { "notify: false", Notify::None },
    room        = { "notify: \"#ops\"", Notify::Room("#ops".into()) },
)]
fn notify_variants(line: &str, expected: Notify) {
    let content = format!("---\nschedule: \"* * * * *\"\nsteps: [compact]\n{line}\n---\n");
    let job = parse(&content).unwrap();
    assert_eq!(job.notify, expected);
}

#[test]
fn notify_true_rejected() {
    let err =
        parse("---\nschedule: \"* * * * *\"\nsteps: [compact]\nnotify: true\n---\n").unwrap_err();
    assert!(matches!(err, ParseError::InvalidNotify));
}

#[test]
fn disabled_job() {
    let job =
        parse("---\nschedule: \"* * * * *\"\nsteps: [compact]\nenabled: false\n---\n").unwrap();
    assert!(!job.enabled);
}

#[test]
fn grace_period_wire_key() {
    let job = parse("---\nschedule: \"* * * * *\"\nsteps: [compact]\ngracePeriodMs: 2500\n---\n")
        .unwrap();
    assert_eq!(job.grace_period_ms, Some(2_500));
}

#[test]
fn bad_session_name_rejected() {
    let err = parse("---\nschedule: \"* * * * *\"\nsteps: [compact]\nsession: \"no spaces\"\n---\n")
        .unwrap_err();
    assert!(matches!(err, ParseError::InvalidSession(_)));
}

#[test]
fn name_from_nested_path() {
    let base = PathBuf::from("/crons");
    let path = base.join("reports").join("weekly.md");
    assert_eq!(job_name_for(&path, Some(&base)), "reports/weekly");
}

#[test]
fn name_without_base_is_stem() {
    assert_eq!(job_name_for(Path::new("/anywhere/cleanup.md"), None), "cleanup");
}
