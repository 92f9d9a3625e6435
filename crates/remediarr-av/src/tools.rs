//! External tool detection and management.

use crate::{Error, Result, ToolCommand};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Information about an external tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    /// Name of the tool.
    pub name: String,
    /// Whether the tool is available.
    pub available: bool,
    /// Version string if available.
    pub version: Option<String>,
    /// Path to the tool executable.
    pub path: Option<PathBuf>,
}

/// Check if a tool is available and get its information.
///
/// # Example
///
/// ```no_run
/// use remediarr_av::check_tool;
///
/// let info = check_tool("mkvmerge");
/// if info.available {
///     println!("mkvmerge version: {:?}", info.version);
/// }
/// ```
pub fn check_tool(name: &str) -> ToolInfo {
    check_tool_with_arg(name, "--version")
}

/// Check if a tool is available using a custom version argument.
pub fn check_tool_with_arg(name: &str, version_arg: &str) -> ToolInfo {
    let result = Command::new(name).arg(version_arg).output();

    match result {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|s| s.to_string());

            ToolInfo {
                name: name.to_string(),
                available: true,
                version,
                path: which::which(name).ok(),
            }
        }
        _ => ToolInfo {
            name: name.to_string(),
            available: false,
            version: None,
            path: None,
        },
    }
}

/// Check every tool remediation can use.
///
/// Returns information about ffmpeg, ffprobe, mkvmerge and docker.
pub fn check_tools() -> Vec<ToolInfo> {
    vec![
        check_tool_with_arg("ffmpeg", "-version"),
        check_tool_with_arg("ffprobe", "-version"),
        check_tool("mkvmerge"),
        check_tool("docker"),
    ]
}

/// Require that a tool is available, returning its path.
///
/// # Errors
///
/// Returns an error if the tool is not found.
pub fn require_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| Error::tool_not_found(name))
}

/// Get the path to a tool, preferring a configured path over PATH lookup.
pub fn get_tool_path(name: &str, config_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = config_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!("Configured {} path {:?} does not exist, searching PATH", name, path);
    }

    require_tool(name)
}

/// Explicit tool locations and limits, usually from configuration.
#[derive(Debug, Clone, Default)]
pub struct ToolOverrides {
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    pub mkvmerge: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

/// Resolved tool locations shared by the probe and action helpers.
///
/// Discovery never fails: a missing tool is reported when an action needs it,
/// so the watcher can still run IGNORE/DELETE/backend-only remediation.
#[derive(Debug, Clone)]
pub struct Toolbox {
    ffmpeg: Option<PathBuf>,
    ffprobe: Option<PathBuf>,
    mkvmerge: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl Toolbox {
    /// Locate tools, preferring configured paths over PATH lookup.
    pub fn discover(overrides: &ToolOverrides) -> Self {
        Self {
            ffmpeg: get_tool_path("ffmpeg", overrides.ffmpeg.as_deref()).ok(),
            ffprobe: get_tool_path("ffprobe", overrides.ffprobe.as_deref()).ok(),
            mkvmerge: get_tool_path("mkvmerge", overrides.mkvmerge.as_deref()).ok(),
            timeout: overrides.timeout,
        }
    }

    /// Build a toolbox from explicit paths without touching PATH.
    pub fn from_paths(
        ffmpeg: Option<PathBuf>,
        ffprobe: Option<PathBuf>,
        mkvmerge: Option<PathBuf>,
    ) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            mkvmerge,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn ffmpeg(&self) -> Result<&Path> {
        self.ffmpeg
            .as_deref()
            .ok_or_else(|| Error::tool_not_found("ffmpeg"))
    }

    pub fn ffprobe(&self) -> Result<&Path> {
        self.ffprobe
            .as_deref()
            .ok_or_else(|| Error::tool_not_found("ffprobe"))
    }

    /// mkvmerge is optional; remux falls back to ffmpeg without it.
    pub fn mkvmerge(&self) -> Option<&Path> {
        self.mkvmerge.as_deref()
    }

    /// Names of required tools that could not be found.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.ffmpeg.is_none() {
            missing.push("ffmpeg");
        }
        if self.ffprobe.is_none() {
            missing.push("ffprobe");
        }
        missing
    }

    /// Start a command for `program` carrying the configured timeout.
    pub fn command(&self, program: &Path) -> ToolCommand {
        let mut cmd = ToolCommand::new(program.to_path_buf());
        if let Some(timeout) = self.timeout {
            cmd.timeout(timeout);
        }
        cmd
    }
}
