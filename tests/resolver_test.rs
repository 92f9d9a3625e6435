//! Resolver tests against configured and built-in action trees.

mod common;

use common::RecordingRemediator;
use remediarr::config::parse_config;
use remediarr::context::MediaFileContext;
use remediarr::resolver::{resolve, OperationError, StepOutcome, TerminalOutcome};
use remediarr::rules::{RuleTable, Verb};

fn ctx(rule: &str) -> MediaFileContext {
    MediaFileContext::new("bazarr", rule, "/movies/Heat (1995)/Heat.mkv", "corrupted")
}

#[tokio::test]
async fn builtin_corruption_tree_falls_through_to_replace() {
    let table = RuleTable::builtin();
    let rule = table
        .find("ffprobe cannot analyze this video file. Could it be corrupted? /m/a.mkv")
        .unwrap();
    let remediator = RecordingRemediator::new()
        .fail(Verb::Repair)
        .fail(Verb::Remux);

    let resolution = resolve(&rule.action, &mut ctx(&rule.name), &remediator).await;

    assert_eq!(remediator.verbs(), vec![Verb::Repair, Verb::Remux, Verb::Replace]);
    assert_eq!(resolution.outcome, TerminalOutcome::Resolved);
}

#[tokio::test]
async fn configured_tree_is_walked() {
    let config = parse_config(
        r#"
builtin_rules = false

[[rules]]
name = "missing-subs"
pattern = "subtitle track missing"
action = { verb = "rescan", on_failure = { verb = "blacklist", then = "replace" } }
"#,
    )
    .unwrap();
    let table = config.rule_table().unwrap();
    let rule = table.find("subtitle track missing in /tv/a.mkv").unwrap();

    let remediator = RecordingRemediator::new().fail(Verb::Rescan);
    let resolution = resolve(&rule.action, &mut ctx(&rule.name), &remediator).await;
    assert_eq!(
        remediator.verbs(),
        vec![Verb::Rescan, Verb::Blacklist, Verb::Replace]
    );
    assert!(resolution.is_resolved());

    let remediator = RecordingRemediator::new();
    let resolution = resolve(&rule.action, &mut ctx(&rule.name), &remediator).await;
    assert_eq!(remediator.verbs(), vec![Verb::Rescan]);
    assert!(resolution.is_resolved());
}

#[tokio::test]
async fn shutdown_mid_tree_takes_no_fallback() {
    let table = RuleTable::builtin();
    let rule = table
        .find("ffprobe cannot analyze this video file. Could it be corrupted? /m/a.mkv")
        .unwrap();
    let remediator = RecordingRemediator::new()
        .fail(Verb::Repair)
        .fail_with(Verb::Remux, OperationError::Cancelled);

    let resolution = resolve(&rule.action, &mut ctx(&rule.name), &remediator).await;

    assert_eq!(remediator.verbs(), vec![Verb::Repair, Verb::Remux]);
    assert_eq!(resolution.outcome, TerminalOutcome::Interrupted);
    assert_eq!(resolution.steps[1].outcome, StepOutcome::Interrupted);
}
