//! Where log lines come from: a Docker container or a plain file.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use remediarr_av::ToolCommand;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Timeout for `docker inspect`.
const INSPECT_TIMEOUT: Duration = Duration::from_secs(15);

/// A stream of raw log lines that can be (re)connected.
#[async_trait]
pub trait LogSource: Send {
    /// Open the stream, or reopen it after it ended.
    async fn connect(&mut self) -> Result<()>;

    /// Next line without its terminator. `Ok(None)` means the stream ended.
    async fn next_line(&mut self) -> Result<Option<String>>;

    /// Human readable name for logs.
    fn describe(&self) -> String;
}

/// Read one line, lossily decoded. `Ok(None)` at EOF.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    Ok(Some(decode_line(buf)))
}

fn decode_line(buf: &[u8]) -> String {
    let text = String::from_utf8_lossy(buf);
    text.trim_end_matches(&['\n', '\r'][..]).to_string()
}

/// Follows `docker logs` for one container.
pub struct DockerLogSource {
    docker: PathBuf,
    container: String,
    follow: bool,
    replay_history: bool,
    /// When the last stream ended; the next connect resumes from here.
    since: Option<DateTime<Utc>>,
    child: Option<Child>,
    lines: Option<mpsc::Receiver<String>>,
}

impl DockerLogSource {
    pub fn new(docker: PathBuf, container: impl Into<String>) -> Self {
        Self {
            docker,
            container: container.into(),
            follow: true,
            replay_history: false,
            since: None,
            child: None,
            lines: None,
        }
    }

    /// `false` reads the existing log once and ends.
    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    /// Start from the beginning of the container's log on first connect.
    pub fn replay_history(mut self, replay: bool) -> Self {
        self.replay_history = replay;
        self
    }

    /// Arguments for `docker logs`, excluding the program.
    pub fn logs_args(&self) -> Vec<String> {
        let mut args = vec!["logs".to_string()];
        if self.follow {
            args.push("--follow".into());
        }
        match self.since {
            Some(since) => {
                args.push("--since".into());
                args.push(since.to_rfc3339_opts(SecondsFormat::Secs, true));
            }
            None if self.follow && !self.replay_history => {
                args.push("--tail".into());
                args.push("0".into());
            }
            None => {}
        }
        args.push(self.container.clone());
        args
    }

    async fn ensure_running(&self) -> Result<()> {
        let output = ToolCommand::new(self.docker.clone())
            .args(["inspect", "--format", "{{.State.Running}}"])
            .arg(&self.container)
            .timeout(INSPECT_TIMEOUT)
            .execute()
            .await
            .with_context(|| format!("Failed to inspect container {}", self.container))?;

        if output.stdout.trim() != "true" {
            bail!("Container {} is not running", self.container);
        }
        Ok(())
    }

    fn forward<R>(stream: R, tx: mpsc::Sender<String>)
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            while let Ok(Some(line)) = read_line(&mut reader, &mut buf).await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
    }

    async fn finish_stream(&mut self) -> Result<()> {
        self.lines = None;
        if self.follow {
            self.since = Some(Utc::now());
        }

        if let Some(mut child) = self.child.take() {
            let status = child.wait().await.context("Failed to reap docker logs")?;
            if !status.success() {
                bail!("docker logs for {} exited with {}", self.container, status);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LogSource for DockerLogSource {
    async fn connect(&mut self) -> Result<()> {
        // Dropping the old child kills it.
        self.child = None;
        self.lines = None;

        self.ensure_running().await?;

        let args = self.logs_args();
        tracing::debug!("Running {} {}", self.docker.display(), args.join(" "));

        let mut child = Command::new(&self.docker)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.docker.display()))?;

        // Containers log to either stream; merge them.
        let (tx, rx) = mpsc::channel(1024);
        if let Some(stdout) = child.stdout.take() {
            Self::forward(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            Self::forward(stderr, tx);
        }

        self.child = Some(child);
        self.lines = Some(rx);
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        let Some(lines) = self.lines.as_mut() else {
            bail!("{} is not connected", self.describe());
        };

        match lines.recv().await {
            Some(line) => Ok(Some(line)),
            None => {
                self.finish_stream().await?;
                Ok(None)
            }
        }
    }

    fn describe(&self) -> String {
        format!("container {}", self.container)
    }
}

/// Tails a log file, surviving truncation.
pub struct FileLogSource {
    path: PathBuf,
    follow: bool,
    replay_history: bool,
    poll_interval: Duration,
    reader: Option<BufReader<File>>,
    /// Identity of the file behind `reader`.
    opened: Option<FileId>,
    /// Bytes consumed so far, including `partial`.
    position: u64,
    /// Unterminated tail of the file.
    partial: Vec<u8>,
    connected_once: bool,
    changes: Option<mpsc::Receiver<()>>,
    /// Kept alive for as long as `changes` should receive events.
    _watcher: Option<RecommendedWatcher>,
}

impl FileLogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            follow: true,
            replay_history: false,
            poll_interval: Duration::from_secs(1),
            reader: None,
            opened: None,
            position: 0,
            partial: Vec::new(),
            connected_once: false,
            changes: None,
            _watcher: None,
        }
    }

    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    pub fn replay_history(mut self, replay: bool) -> Self {
        self.replay_history = replay;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn watch_changes(&mut self) {
        let Some(dir) = self.path.parent().map(Path::to_path_buf) else {
            return;
        };
        let target = self.path.clone();
        let (tx, rx) = mpsc::channel(1);

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    if event.paths.iter().any(|p| p == &target) {
                        // A pending wakeup already covers this change.
                        let _ = tx.try_send(());
                    }
                }
            },
            notify::Config::default(),
        )
        .and_then(|mut watcher| {
            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
            Ok(watcher)
        });

        match watcher {
            Ok(watcher) => {
                self._watcher = Some(watcher);
                self.changes = Some(rx);
            }
            Err(e) => {
                tracing::warn!("Cannot watch {:?}, polling instead: {}", dir, e);
                self._watcher = None;
                self.changes = None;
            }
        }
    }

    async fn wait_for_change(&mut self) {
        match self.changes.as_mut() {
            Some(changes) => {
                tokio::select! {
                    _ = changes.recv() => {}
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
            None => tokio::time::sleep(self.poll_interval).await,
        }
    }

    async fn open_at(&mut self, position: u64) -> Result<()> {
        let mut file = File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open log file {:?}", self.path))?;
        file.seek(SeekFrom::Start(position)).await?;
        self.opened = file_id(&file.metadata().await?);
        self.reader = Some(BufReader::new(file));
        self.position = position;
        self.partial.clear();
        Ok(())
    }

    /// Decide what to do after a read hit the end of the open handle.
    async fn at_eof(&mut self) -> Result<Eof> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Log file {:?} disappeared", self.path);
                return Ok(Eof::Gone);
            }
            Err(e) => return Err(e).context("Failed to stat log file"),
        };

        if rotated(self.opened, file_id(&meta)) {
            tracing::info!("Log file {:?} was rotated, reading the new file", self.path);
            return Ok(Eof::Rotated);
        }

        if meta.len() < self.position {
            tracing::info!("Log file {:?} was truncated, reading from the start", self.path);
            self.open_at(0).await?;
            return Ok(Eof::Retry);
        }

        if meta.len() == self.position {
            self.wait_for_change().await;
        }
        Ok(Eof::Retry)
    }
}

enum Eof {
    /// Read the open handle again.
    Retry,
    /// The path now names another file; the open handle is exhausted.
    Rotated,
    Gone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileId {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;
    Some(FileId {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<FileId> {
    None
}

/// Unknown identities never count as a rotation; truncation still applies.
fn rotated(opened: Option<FileId>, current: Option<FileId>) -> bool {
    matches!((opened, current), (Some(a), Some(b)) if a != b)
}

#[async_trait]
impl LogSource for FileLogSource {
    async fn connect(&mut self) -> Result<()> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .with_context(|| format!("Log file {:?} is not readable", self.path))?;
        let len = meta.len();

        let start = if !self.connected_once {
            if self.follow && !self.replay_history {
                len
            } else {
                0
            }
        } else if len < self.position || rotated(self.opened, file_id(&meta)) {
            0
        } else {
            self.position
        };

        self.open_at(start).await?;
        self.connected_once = true;
        if self.follow {
            self.watch_changes();
        }
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                bail!("{} is not connected", self.describe());
            };

            let read = reader
                .read_until(b'\n', &mut self.partial)
                .await
                .context("Failed to read log file")?;
            self.position += read as u64;

            if self.partial.last() == Some(&b'\n') {
                let line = decode_line(&self.partial);
                self.partial.clear();
                return Ok(Some(line));
            }

            if read > 0 {
                continue;
            }

            if !self.follow {
                self.reader = None;
                if self.partial.is_empty() {
                    return Ok(None);
                }
                let line = decode_line(&self.partial);
                self.partial.clear();
                return Ok(Some(line));
            }

            match self.at_eof().await? {
                Eof::Retry => {}
                Eof::Rotated => {
                    let leftover = std::mem::take(&mut self.partial);
                    self.open_at(0).await?;
                    if !leftover.is_empty() {
                        return Ok(Some(decode_line(&leftover)));
                    }
                }
                Eof::Gone => {
                    self.reader = None;
                    return Ok(None);
                }
            }
        }
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
