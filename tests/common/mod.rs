//! Shared test harness for integration tests.
//!
//! Provides [`RecordingRemediator`], a scripted stand-in for the real
//! remediation layer, and [`ScriptedLogSource`], which replays canned log
//! lines per connection.

#![allow(dead_code)]

use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;
use remediarr::config::default_line_pattern;
use remediarr::context::MediaFileContext;
use remediarr::logline::LineParser;
use remediarr::resolver::{OperationError, Remediator};
use remediarr::rules::{RuleTable, Verb};
use remediarr::watch::{LogSource, WatchMode, WatchSettings, Watcher};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Records every verb it is asked to perform and fails the scripted ones.
#[derive(Default)]
pub struct RecordingRemediator {
    failing: HashMap<Verb, OperationError>,
    calls: Mutex<Vec<(Verb, PathBuf)>>,
}

impl RecordingRemediator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(mut self, verb: Verb) -> Self {
        self.failing
            .insert(verb, OperationError::fatal(format!("{verb} scripted to fail")));
        self
    }

    pub fn fail_with(mut self, verb: Verb, err: OperationError) -> Self {
        self.failing.insert(verb, err);
        self
    }

    pub fn verbs(&self) -> Vec<Verb> {
        self.calls.lock().iter().map(|(verb, _)| *verb).collect()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.calls.lock().iter().map(|(_, path)| path.clone()).collect()
    }
}

#[async_trait]
impl Remediator for RecordingRemediator {
    async fn perform(&self, verb: Verb, ctx: &mut MediaFileContext) -> Result<(), OperationError> {
        self.calls.lock().push((verb, ctx.file_path.clone()));
        match self.failing.get(&verb) {
            Some(err) => Err(err.clone()),
            None => {
                // Mirror the bookkeeping of the real operations.
                match verb {
                    Verb::Repair => ctx.replacement = Some(ctx.file_path.with_extension("repaired.mkv")),
                    Verb::Remux => ctx.replacement = Some(ctx.file_path.with_extension("remux.mkv")),
                    Verb::Delete | Verb::Replace => ctx.replacement = None,
                    _ => {}
                }
                Ok(())
            }
        }
    }
}

/// Collects formatted `tracing` output for assertions on audit records.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Route this thread's events here until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || sink.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Captured lines at `level`, e.g. `"INFO"`.
    pub fn at(&self, level: &str) -> Vec<String> {
        let text = String::from_utf8_lossy(&self.0.lock()).into_owned();
        text.lines()
            .filter(|line| line.split_whitespace().nth(1) == Some(level))
            .map(String::from)
            .collect()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Each `connect` starts the next scripted session of lines.
pub struct ScriptedLogSource {
    sessions: VecDeque<Vec<String>>,
    current: VecDeque<String>,
    refuse_first: u32,
    hang_at_end: bool,
    connects: Arc<AtomicU32>,
}

impl ScriptedLogSource {
    pub fn new() -> Self {
        Self {
            sessions: VecDeque::new(),
            current: VecDeque::new(),
            refuse_first: 0,
            hang_at_end: false,
            connects: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn session<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sessions
            .push_back(lines.into_iter().map(Into::into).collect());
        self
    }

    /// Refuse the first `n` connection attempts.
    pub fn refuse_first(mut self, n: u32) -> Self {
        self.refuse_first = n;
        self
    }

    /// Block forever after the last line instead of ending the stream.
    pub fn hang_at_end(mut self) -> Self {
        self.hang_at_end = true;
        self
    }

    /// Shared counter of connection attempts.
    pub fn connects(&self) -> Arc<AtomicU32> {
        self.connects.clone()
    }
}

#[async_trait]
impl LogSource for ScriptedLogSource {
    async fn connect(&mut self) -> anyhow::Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse_first > 0 {
            self.refuse_first -= 1;
            bail!("connection refused");
        }
        match self.sessions.pop_front() {
            Some(lines) => {
                self.current = lines.into();
                Ok(())
            }
            None => bail!("container is gone"),
        }
    }

    async fn next_line(&mut self) -> anyhow::Result<Option<String>> {
        if let Some(line) = self.current.pop_front() {
            return Ok(Some(line));
        }
        if self.hang_at_end {
            std::future::pending::<()>().await;
        }
        Ok(None)
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// A Bazarr error line as it appears in `docker logs`.
pub fn bazarr_error(message: &str) -> String {
    format!("2024-03-01 10:00:01,123 - root (7f2a) :  ERROR (get_video_info:88) - BAZARR {message}")
}

pub fn bazarr_info(message: &str) -> String {
    format!("2024-03-01 10:00:01,123 - root (7f2a) :  INFO (main:12) - BAZARR {message}")
}

pub fn corruption_message(path: &std::path::Path) -> String {
    format!(
        "ffprobe cannot analyze this video file. Could it be corrupted? {}",
        path.display()
    )
}

/// Fast retries, no backend checks.
pub fn test_settings(mode: WatchMode) -> WatchSettings {
    WatchSettings {
        mode,
        max_connect_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        check_backends: false,
        ..WatchSettings::default()
    }
}

pub fn watcher(
    source: ScriptedLogSource,
    remediator: Arc<RecordingRemediator>,
    settings: WatchSettings,
    cancel: CancellationToken,
) -> Watcher {
    let parser = LineParser::new(&default_line_pattern()).unwrap();
    Watcher::new(
        Box::new(source),
        RuleTable::builtin(),
        parser,
        remediator,
        settings,
        cancel,
    )
}
