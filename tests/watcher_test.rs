//! Watcher integration tests: lines in, remediation calls out.

mod common;

use assert_matches::assert_matches;
use common::*;
use remediarr::resolver::{OperationError, TerminalOutcome};
use remediarr::rules::Verb;
use remediarr::watch::{LineDisposition, SkipReason, StopReason, WatchMode};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn media_file(dir: &TempDir, name: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, b"not really a video").unwrap();
    path
}

#[tokio::test]
async fn corrupt_file_repair_fails_remux_succeeds() {
    let dir = TempDir::new().unwrap();
    let file = media_file(&dir, "Heat (1995).mkv");
    let remediator = Arc::new(RecordingRemediator::new().fail(Verb::Repair));
    let mut watcher = watcher(
        ScriptedLogSource::new(),
        remediator.clone(),
        test_settings(WatchMode::Once),
        CancellationToken::new(),
    );

    let disposition = watcher
        .process_line(&bazarr_error(&corruption_message(&file)))
        .await;

    assert_eq!(remediator.verbs(), vec![Verb::Repair, Verb::Remux, Verb::Delete]);
    assert!(remediator.paths().iter().all(|p| p == &file));
    assert_matches!(disposition, LineDisposition::Resolved { rule, resolution } => {
        assert_eq!(rule, "corrupt-file");
        assert_eq!(resolution.outcome, TerminalOutcome::Resolved);
        assert_eq!(resolution.trail(), "REPAIR:failed -> REMUX:ok -> DELETE:ok");
    });
    assert_eq!(watcher.stats().resolved, 1);
}

#[tokio::test]
async fn resolved_incident_is_audited_with_original_path() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let dir = TempDir::new().unwrap();
    let file = media_file(&dir, "Heat (1995).mkv");
    let remediator = Arc::new(RecordingRemediator::new().fail(Verb::Repair));
    let mut watcher = watcher(
        ScriptedLogSource::new(),
        remediator,
        test_settings(WatchMode::Once),
        CancellationToken::new(),
    );
    watcher
        .process_line(&bazarr_error(&corruption_message(&file)))
        .await;

    let path = file.display().to_string();
    let audit: Vec<_> = logs
        .at("INFO")
        .into_iter()
        .filter(|line| line.contains("Resolved"))
        .collect();
    assert_eq!(audit.len(), 1, "{audit:?}");
    assert!(audit[0].contains("rule=corrupt-file"), "{}", audit[0]);
    assert!(audit[0].contains(&path), "{}", audit[0]);
    assert!(audit[0].contains("REPAIR:failed -> REMUX:ok -> DELETE:ok"), "{}", audit[0]);
}

#[tokio::test]
async fn exhausted_incident_is_audited_at_error() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let dir = TempDir::new().unwrap();
    let file = media_file(&dir, "e.mkv");
    let remediator = Arc::new(
        RecordingRemediator::new()
            .fail(Verb::Repair)
            .fail(Verb::Remux)
            .fail(Verb::Replace),
    );
    let mut watcher = watcher(
        ScriptedLogSource::new(),
        remediator,
        test_settings(WatchMode::Once),
        CancellationToken::new(),
    );
    watcher
        .process_line(&bazarr_error(&corruption_message(&file)))
        .await;

    let errors = logs.at("ERROR");
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].contains("rule=corrupt-file"), "{}", errors[0]);
    assert!(errors[0].contains(&file.display().to_string()), "{}", errors[0]);
}

#[tokio::test]
async fn interrupted_walk_reports_salvaged_copy() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let dir = TempDir::new().unwrap();
    let file = media_file(&dir, "f.mkv");
    let remediator = Arc::new(
        RecordingRemediator::new()
            .fail(Verb::Repair)
            .fail_with(Verb::Delete, OperationError::Cancelled),
    );
    let mut watcher = watcher(
        ScriptedLogSource::new(),
        remediator,
        test_settings(WatchMode::Once),
        CancellationToken::new(),
    );
    let disposition = watcher
        .process_line(&bazarr_error(&corruption_message(&file)))
        .await;

    assert_matches!(disposition, LineDisposition::Resolved { resolution, .. } => {
        assert_eq!(resolution.outcome, TerminalOutcome::Interrupted);
    });
    let copy = dir.path().join("f.remux.mkv").display().to_string();
    assert!(
        logs.at("WARN")
            .iter()
            .any(|line| line.contains("Salvaged copy") && line.contains(&copy)),
        "no salvaged copy record"
    );
}

#[tokio::test]
async fn everything_fails_is_exhausted() {
    let dir = TempDir::new().unwrap();
    let file = media_file(&dir, "a.mkv");
    let remediator = Arc::new(
        RecordingRemediator::new()
            .fail(Verb::Repair)
            .fail(Verb::Remux)
            .fail_with(Verb::Replace, OperationError::transient("radarr timed out")),
    );
    let mut watcher = watcher(
        ScriptedLogSource::new(),
        remediator.clone(),
        test_settings(WatchMode::Once),
        CancellationToken::new(),
    );

    let disposition = watcher
        .process_line(&bazarr_error(&corruption_message(&file)))
        .await;

    assert_eq!(remediator.verbs(), vec![Verb::Repair, Verb::Remux, Verb::Replace]);
    assert_matches!(disposition, LineDisposition::Resolved { resolution, .. } => {
        assert_eq!(resolution.outcome, TerminalOutcome::Exhausted);
    });
    assert_eq!(watcher.stats().exhausted, 1);
}

#[tokio::test]
async fn unmatched_and_non_error_lines_invoke_nothing() {
    let remediator = Arc::new(RecordingRemediator::new());
    let mut watcher = watcher(
        ScriptedLogSource::new(),
        remediator.clone(),
        test_settings(WatchMode::Once),
        CancellationToken::new(),
    );

    assert_eq!(
        watcher
            .process_line(&bazarr_error("Failed to download subtitle from opensubtitles"))
            .await,
        LineDisposition::Unmatched
    );
    assert_eq!(
        watcher.process_line(&bazarr_info("Bazarr is started")).await,
        LineDisposition::NotAnError
    );
    assert_eq!(watcher.process_line("").await, LineDisposition::NotAnError);

    assert!(remediator.verbs().is_empty());
}

#[tokio::test]
async fn ignore_rules_invoke_nothing() {
    let remediator = Arc::new(RecordingRemediator::new());
    let mut watcher = watcher(
        ScriptedLogSource::new(),
        remediator.clone(),
        test_settings(WatchMode::Once),
        CancellationToken::new(),
    );

    let disposition = watcher
        .process_line(&bazarr_error("Error trying to get series from Sonarr. Timeout"))
        .await;
    assert_eq!(
        disposition,
        LineDisposition::Ignored {
            rule: "timeout".into()
        }
    );
    assert!(remediator.verbs().is_empty());
}

#[tokio::test]
async fn repeated_error_is_remediated_once() {
    let dir = TempDir::new().unwrap();
    let file = media_file(&dir, "b.mkv");
    let remediator = Arc::new(RecordingRemediator::new());
    let mut watcher = watcher(
        ScriptedLogSource::new(),
        remediator.clone(),
        test_settings(WatchMode::Once),
        CancellationToken::new(),
    );

    let line = bazarr_error(&corruption_message(&file));
    watcher.process_line(&line).await;
    assert_eq!(watcher.process_line(&line).await, LineDisposition::Duplicate);

    assert_eq!(remediator.verbs(), vec![Verb::Repair, Verb::Delete]);
    assert_eq!(watcher.stats().duplicates, 1);
}

#[tokio::test]
async fn missing_files_are_skipped() {
    let remediator = Arc::new(RecordingRemediator::new());
    let mut watcher = watcher(
        ScriptedLogSource::new(),
        remediator.clone(),
        test_settings(WatchMode::Once),
        CancellationToken::new(),
    );

    let line = bazarr_error(&corruption_message(std::path::Path::new(
        "/nonexistent/movies/Gone.mkv",
    )));
    assert_eq!(
        watcher.process_line(&line).await,
        LineDisposition::Skipped {
            rule: "corrupt-file".into(),
            reason: SkipReason::Missing
        }
    );
    assert!(remediator.verbs().is_empty());
}

#[tokio::test]
async fn missing_files_resolve_when_skipping_is_off() {
    let remediator = Arc::new(RecordingRemediator::new());
    let mut settings = test_settings(WatchMode::Once);
    settings.skip_missing_files = false;
    let mut watcher = watcher(
        ScriptedLogSource::new(),
        remediator.clone(),
        settings,
        CancellationToken::new(),
    );

    let line = bazarr_error("/nonexistent/x.iso is not a valid video extension");
    watcher.process_line(&line).await;
    assert_eq!(
        remediator.verbs(),
        vec![Verb::Blacklist, Verb::Remux, Verb::Delete]
    );
}

#[tokio::test]
async fn dry_run_plans_without_acting() {
    let dir = TempDir::new().unwrap();
    let file = media_file(&dir, "c.mkv");
    let remediator = Arc::new(RecordingRemediator::new());
    let mut settings = test_settings(WatchMode::Once);
    settings.dry_run = true;
    let mut watcher = watcher(
        ScriptedLogSource::new(),
        remediator.clone(),
        settings,
        CancellationToken::new(),
    );

    let disposition = watcher
        .process_line(&bazarr_error(&corruption_message(&file)))
        .await;
    assert_matches!(disposition, LineDisposition::Planned { plan, .. } => {
        assert!(plan.starts_with("REPAIR"));
    });
    assert!(remediator.verbs().is_empty());
    assert!(file.exists());
}

#[tokio::test]
async fn once_mode_drains_and_stops_clean() {
    let dir = TempDir::new().unwrap();
    let file = media_file(&dir, "d.mkv");
    let source = ScriptedLogSource::new().session([
        bazarr_info("starting"),
        bazarr_error(&corruption_message(&file)),
        bazarr_error("Failed to download subtitle"),
    ]);
    let remediator = Arc::new(RecordingRemediator::new());

    let report = watcher(
        source,
        remediator.clone(),
        test_settings(WatchMode::Once),
        CancellationToken::new(),
    )
    .run()
    .await;

    assert!(report.is_clean());
    assert_eq!(report.stats.lines, 3);
    assert_eq!(report.stats.errors, 2);
    assert_eq!(report.stats.resolved, 1);
    assert_eq!(report.stats.unmatched, 1);
    assert_eq!(remediator.verbs(), vec![Verb::Repair, Verb::Delete]);
}

#[tokio::test]
async fn connect_failures_exhaust_attempts() {
    let source = ScriptedLogSource::new().refuse_first(10);
    let connects = source.connects();

    let report = watcher(
        source,
        Arc::new(RecordingRemediator::new()),
        test_settings(WatchMode::Follow),
        CancellationToken::new(),
    )
    .run()
    .await;

    assert_matches!(report.reason, StopReason::Fatal(message) => {
        assert!(message.contains("after 3 attempts"), "{message}");
    });
    assert_eq!(connects.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn connect_recovers_within_attempts() {
    let source = ScriptedLogSource::new()
        .refuse_first(2)
        .session([bazarr_info("hello")]);
    let connects = source.connects();

    let report = watcher(
        source,
        Arc::new(RecordingRemediator::new()),
        test_settings(WatchMode::Once),
        CancellationToken::new(),
    )
    .run()
    .await;

    assert!(report.is_clean());
    assert_eq!(connects.load(Ordering::SeqCst), 3);
    assert_eq!(report.stats.lines, 1);
}

#[tokio::test]
async fn follow_mode_reconnects_after_stream_end() {
    let source = ScriptedLogSource::new()
        .session([bazarr_info("first container run")])
        .session([bazarr_info("second container run")]);
    let connects = source.connects();

    let report = watcher(
        source,
        Arc::new(RecordingRemediator::new()),
        test_settings(WatchMode::Follow),
        CancellationToken::new(),
    )
    .run()
    .await;

    // Both sessions are read; the third connect finds nothing and gives up.
    assert_eq!(report.stats.lines, 2);
    assert_eq!(report.stats.reconnects, 2);
    assert_eq!(connects.load(Ordering::SeqCst), 2 + 3);
    assert_matches!(report.reason, StopReason::Fatal(_));
}

#[tokio::test]
async fn cancellation_stops_cleanly() {
    let source = ScriptedLogSource::new()
        .session([bazarr_info("only line")])
        .hang_at_end();
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(
        watcher(
            source,
            Arc::new(RecordingRemediator::new()),
            test_settings(WatchMode::Follow),
            cancel.clone(),
        )
        .run(),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(report.is_clean());
    assert_eq!(report.stats.lines, 1);
}

#[tokio::test]
async fn cancellation_during_backoff_is_clean() {
    let source = ScriptedLogSource::new().refuse_first(u32::MAX);
    let cancel = CancellationToken::new();
    let mut settings = test_settings(WatchMode::Follow);
    settings.max_connect_attempts = 100;
    settings.initial_backoff = Duration::from_secs(60);

    let handle = tokio::spawn(
        watcher(source, Arc::new(RecordingRemediator::new()), settings, cancel.clone()).run(),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(report.is_clean());
}
