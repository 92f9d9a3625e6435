//! The watcher loop: read lines, suppress repeats, match rules, resolve.
//!
//! ```text
//! Starting ──connect ok──▶ Streaming ──cancel──▶ Draining ──▶ Stopped(Clean)
//!    ▲  │                      │
//!    │  └─attempts exhausted──▶ Stopped(Fatal)
//!    └──────stream ended───────┘ (follow mode; once mode drains instead)
//! ```
//!
//! Lines are handled strictly one at a time. A resolution in progress when
//! shutdown is requested runs to completion; its operations see the same
//! cancellation token and return early.

pub mod source;

pub use source::{DockerLogSource, FileLogSource, LogSource};

use crate::arr::{create_client, MediaBackend};
use crate::config::Config;
use crate::context::MediaFileContext;
use crate::dedup::{DedupWindow, FingerprintPolicy};
use crate::logline::LineParser;
use crate::remediation::{FfmpegTranscoder, Remediation};
use crate::resolver::{self, Remediator, Resolution, TerminalOutcome};
use crate::rules::RuleTable;
use anyhow::{bail, Context, Result};
use remediarr_av::Toolbox;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherState {
    Starting,
    Streaming,
    Draining,
    Stopped(StopReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Clean,
    Fatal(String),
}

/// Whether the end of the log stream means "reconnect" or "done".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Follow,
    Once,
}

#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub mode: WatchMode,
    pub max_connect_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub check_backends: bool,
    pub skip_missing_files: bool,
    /// Log the planned action tree instead of running it.
    pub dry_run: bool,
    pub dedup_capacity: usize,
    pub dedup_ttl: Option<Duration>,
    pub fingerprint: FingerprintPolicy,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self::from_config(&Config::default(), WatchMode::Follow)
    }
}

impl WatchSettings {
    pub fn from_config(config: &Config, mode: WatchMode) -> Self {
        let watch = &config.watch;
        let dedup = &config.dedup;
        Self {
            mode,
            max_connect_attempts: watch.max_connect_attempts.max(1),
            initial_backoff: Duration::from_millis(watch.initial_backoff_ms),
            max_backoff: Duration::from_millis(watch.max_backoff_ms),
            check_backends: watch.check_backends,
            skip_missing_files: watch.skip_missing_files,
            dry_run: false,
            dedup_capacity: dedup.capacity,
            dedup_ttl: (dedup.ttl_secs > 0).then(|| Duration::from_secs(dedup.ttl_secs)),
            fingerprint: dedup.fingerprint.clone(),
        }
    }
}

/// Counters reported when the watcher stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub lines: u64,
    pub errors: u64,
    pub duplicates: u64,
    pub unmatched: u64,
    pub ignored: u64,
    pub skipped: u64,
    pub planned: u64,
    pub resolved: u64,
    pub exhausted: u64,
    pub interrupted: u64,
    pub reconnects: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The error names no file to act on.
    NoPath,
    /// The file is already gone, usually remediated earlier.
    Missing,
}

/// What happened to one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineDisposition {
    NotAnError,
    Duplicate,
    Unmatched,
    Ignored { rule: String },
    Skipped { rule: String, reason: SkipReason },
    Planned { rule: String, plan: String },
    Resolved { rule: String, resolution: Resolution },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchReport {
    pub reason: StopReason,
    pub stats: WatchStats,
}

impl WatchReport {
    pub fn is_clean(&self) -> bool {
        self.reason == StopReason::Clean
    }
}

pub struct Watcher {
    source: Box<dyn LogSource>,
    origin: String,
    rules: RuleTable,
    parser: LineParser,
    remediator: Arc<dyn Remediator>,
    backends: Vec<Arc<dyn MediaBackend>>,
    dedup: DedupWindow,
    settings: WatchSettings,
    cancel: CancellationToken,
    stats: WatchStats,
}

impl Watcher {
    pub fn new(
        source: Box<dyn LogSource>,
        rules: RuleTable,
        parser: LineParser,
        remediator: Arc<dyn Remediator>,
        settings: WatchSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            origin: source.describe(),
            source,
            rules,
            parser,
            remediator,
            backends: Vec::new(),
            dedup: DedupWindow::new(settings.dedup_capacity, settings.dedup_ttl),
            settings,
            cancel,
            stats: WatchStats::default(),
        }
    }

    /// Backends whose connectivity is checked before streaming.
    pub fn with_backends(mut self, backends: Vec<Arc<dyn MediaBackend>>) -> Self {
        self.backends = backends;
        self
    }

    /// Wire up the production collaborators described by `config`.
    pub fn from_config(
        config: &Config,
        mode: WatchMode,
        dry_run: bool,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let follow = mode == WatchMode::Follow;
        let source: Box<dyn LogSource> = match (&config.source.container, &config.source.log_file) {
            (Some(container), _) => {
                let docker = remediarr_av::tools::get_tool_path(
                    "docker",
                    config.tools.docker_path.as_deref(),
                )
                .context("docker is required to follow container logs")?;
                Box::new(
                    DockerLogSource::new(docker, container.clone())
                        .follow(follow)
                        .replay_history(config.source.replay_history),
                )
            }
            (None, Some(path)) => Box::new(
                FileLogSource::new(path.clone())
                    .follow(follow)
                    .replay_history(config.source.replay_history)
                    .poll_interval(Duration::from_millis(config.source.poll_interval_ms)),
            ),
            (None, None) => bail!("No log source configured: set source.container or source.log_file"),
        };

        let rules = config.rule_table()?;
        let parser = config.line_parser()?;

        let toolbox = Toolbox::discover(&config.tool_overrides());
        let missing = toolbox.missing();
        if !missing.is_empty() {
            tracing::warn!("Missing tools: {}; REPAIR and REMUX will fail", missing.join(", "));
        }

        let backends: Vec<Arc<dyn MediaBackend>> = config.enabled_arrs().map(create_client).collect();
        let remediation = Remediation::new(
            Arc::new(FfmpegTranscoder::new(toolbox)),
            backends.clone(),
            cancel.clone(),
        );

        let mut settings = WatchSettings::from_config(config, mode);
        settings.dry_run = dry_run;

        Ok(Self::new(source, rules, parser, Arc::new(remediation), settings, cancel)
            .with_backends(backends))
    }

    pub fn stats(&self) -> &WatchStats {
        &self.stats
    }

    /// Drive the state machine until it stops.
    pub async fn run(mut self) -> WatchReport {
        let mut state = WatcherState::Starting;
        loop {
            tracing::trace!(?state, "Watcher state");
            state = match state {
                WatcherState::Starting => self.start().await,
                WatcherState::Streaming => self.stream().await,
                WatcherState::Draining => {
                    self.log_summary();
                    WatcherState::Stopped(StopReason::Clean)
                }
                WatcherState::Stopped(reason) => {
                    if let StopReason::Fatal(message) = &reason {
                        tracing::error!("Watcher stopped: {}", message);
                    }
                    return WatchReport {
                        reason,
                        stats: self.stats,
                    };
                }
            };
        }
    }

    async fn start(&mut self) -> WatcherState {
        let max_attempts = self.settings.max_connect_attempts.max(1);
        let mut backoff = self.settings.initial_backoff;
        let mut attempt = 0;

        loop {
            if self.cancel.is_cancelled() {
                return WatcherState::Draining;
            }
            attempt += 1;

            let error = match self.connect().await {
                Ok(()) => {
                    tracing::info!("Watching {}", self.origin);
                    return WatcherState::Streaming;
                }
                Err(e) => e,
            };

            if attempt >= max_attempts {
                return WatcherState::Stopped(StopReason::Fatal(format!(
                    "could not connect to {} after {} attempts: {:#}",
                    self.origin, attempt, error
                )));
            }

            tracing::warn!(
                "Connection attempt {}/{} failed: {:#}; retrying in {:?}",
                attempt,
                max_attempts,
                error,
                backoff
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return WatcherState::Draining,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.settings.max_backoff);
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if self.settings.check_backends {
            for backend in &self.backends {
                let reachable = backend
                    .test_connection()
                    .await
                    .with_context(|| format!("{} is unreachable", backend.name()))?;
                if !reachable {
                    bail!("{} rejected the API key", backend.name());
                }
                tracing::debug!("{} ({}) is reachable", backend.name(), backend.kind().as_str());
            }
        }

        self.source.connect().await
    }

    async fn stream(&mut self) -> WatcherState {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return WatcherState::Draining,
                next = self.source.next_line() => next,
            };

            match (next, self.settings.mode) {
                (Ok(Some(line)), _) => {
                    self.process_line(&line).await;
                }
                (Ok(None), WatchMode::Once) => return WatcherState::Draining,
                (Ok(None), WatchMode::Follow) => {
                    tracing::info!("Log stream from {} ended, reconnecting", self.origin);
                    self.stats.reconnects += 1;
                    return WatcherState::Starting;
                }
                (Err(e), WatchMode::Once) => {
                    return WatcherState::Stopped(StopReason::Fatal(format!("{:#}", e)))
                }
                (Err(e), WatchMode::Follow) => {
                    tracing::warn!("Reading {} failed: {:#}; reconnecting", self.origin, e);
                    self.stats.reconnects += 1;
                    return WatcherState::Starting;
                }
            }
        }
    }

    /// Parse, deduplicate, match and resolve one raw line.
    pub async fn process_line(&mut self, line: &str) -> LineDisposition {
        self.stats.lines += 1;

        let Some(error) = self.parser.parse(line) else {
            return LineDisposition::NotAnError;
        };
        self.stats.errors += 1;

        let fingerprint = self
            .settings
            .fingerprint
            .fingerprint(&error.cause, error.file_path.as_deref());
        if !self.dedup.should_process(&fingerprint) {
            tracing::debug!("Suppressed repeat: {}", fingerprint);
            self.stats.duplicates += 1;
            return LineDisposition::Duplicate;
        }

        let Some(rule) = self.rules.find(&error.message) else {
            tracing::debug!("No rule matches: {}", error.message);
            self.stats.unmatched += 1;
            return LineDisposition::Unmatched;
        };
        let name = rule.name.clone();

        if rule.action.is_passive() {
            tracing::debug!(rule = %name, "Ignored: {}", error.message);
            self.stats.ignored += 1;
            return LineDisposition::Ignored { rule: name };
        }

        let Some(path) = error.file_path else {
            tracing::warn!(rule = %name, "No file path in error, skipping: {}", error.message);
            self.stats.skipped += 1;
            return LineDisposition::Skipped {
                rule: name,
                reason: SkipReason::NoPath,
            };
        };

        if self.settings.skip_missing_files
            && !tokio::fs::try_exists(&path).await.unwrap_or(false)
        {
            tracing::info!(rule = %name, "Skipping {}: file no longer exists", path.display());
            self.stats.skipped += 1;
            return LineDisposition::Skipped {
                rule: name,
                reason: SkipReason::Missing,
            };
        }

        if self.settings.dry_run {
            let plan = rule.action.to_string();
            tracing::info!(rule = %name, "Would run {} on {}", plan, path.display());
            self.stats.planned += 1;
            return LineDisposition::Planned { rule: name, plan };
        }

        let mut ctx = MediaFileContext::new(&self.origin, &name, path, error.cause);
        tracing::info!(
            incident = %ctx.incident,
            rule = %name,
            file = %ctx.file_path.display(),
            "Remediating: {}",
            rule.action
        );

        let resolution = resolver::resolve(&rule.action, &mut ctx, self.remediator.as_ref()).await;
        match resolution.outcome {
            TerminalOutcome::Resolved => self.stats.resolved += 1,
            TerminalOutcome::Exhausted => self.stats.exhausted += 1,
            TerminalOutcome::Interrupted => self.stats.interrupted += 1,
        }

        LineDisposition::Resolved {
            rule: name,
            resolution,
        }
    }

    fn log_summary(&self) {
        let s = &self.stats;
        tracing::info!(
            lines = s.lines,
            errors = s.errors,
            duplicates = s.duplicates,
            unmatched = s.unmatched,
            ignored = s.ignored,
            skipped = s.skipped,
            planned = s.planned,
            resolved = s.resolved,
            exhausted = s.exhausted,
            interrupted = s.interrupted,
            "Stopped watching {}",
            self.origin
        );
    }
}
