use crate::dedup::FingerprintPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub arrs: Vec<ArrConfig>,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    /// Custom rules, evaluated before the built-in table.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Append the built-in Bazarr rule table after custom rules.
    #[serde(default = "default_true")]
    pub builtin_rules: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            arrs: Vec::new(),
            tools: ToolsConfig::default(),
            dedup: DedupConfig::default(),
            watch: WatchConfig::default(),
            rules: Vec::new(),
            builtin_rules: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Where log lines come from. Exactly one of `container` or `log_file` must
/// be set before watching.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Docker container whose logs are followed.
    #[serde(default)]
    pub container: Option<String>,

    /// Plain log file to follow instead of a container.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Regex locating error lines. Must define a `message` capture group.
    #[serde(default = "default_line_pattern")]
    pub line_pattern: String,

    /// Process the existing log history when the watcher first connects.
    #[serde(default)]
    pub replay_history: bool,

    /// Fallback poll interval for log files when no change event arrives.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

pub fn default_line_pattern() -> String {
    r"ERROR \((?P<origin>[^)]*)\) - BAZARR (?P<message>.+)$".to_string()
}

fn default_poll_interval() -> u64 {
    1000
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            container: None,
            log_file: None,
            line_pattern: default_line_pattern(),
            replay_history: false,
            poll_interval_ms: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArrConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub arr_type: ArrType,

    pub url: String,

    pub api_key: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-request timeout in seconds.
    #[serde(default = "default_arr_timeout")]
    pub timeout_secs: u64,

    /// Attempts made while the backend keeps answering a blacklist update
    /// with 202 Accepted without applying it.
    #[serde(default = "default_blacklist_retries")]
    pub blacklist_retries: u32,

    #[serde(default = "default_blacklist_retry_delay")]
    pub blacklist_retry_delay_secs: u64,
}

fn default_arr_timeout() -> u64 {
    30
}

fn default_blacklist_retries() -> u32 {
    3
}

fn default_blacklist_retry_delay() -> u64 {
    5
}

impl ArrConfig {
    /// A config entry with defaults, as created from CLI flags.
    pub fn new(arr_type: ArrType, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: arr_type.as_str().to_string(),
            arr_type,
            url: url.into(),
            api_key: api_key.into(),
            enabled: true,
            timeout_secs: default_arr_timeout(),
            blacklist_retries: default_blacklist_retries(),
            blacklist_retry_delay_secs: default_blacklist_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArrType {
    Radarr,
    Sonarr,
}

impl ArrType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArrType::Radarr => "radarr",
            ArrType::Sonarr => "sonarr",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    #[serde(default)]
    pub mkvmerge_path: Option<PathBuf>,

    #[serde(default)]
    pub docker_path: Option<PathBuf>,

    /// Upper bound for a single repair/remux/probe invocation.
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

fn default_tool_timeout() -> u64 {
    1800
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            mkvmerge_path: None,
            docker_path: None,
            timeout_secs: default_tool_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DedupConfig {
    /// Maximum number of fingerprints remembered.
    #[serde(default = "default_dedup_capacity")]
    pub capacity: usize,

    /// Seconds before a fingerprint is forgotten. 0 disables age expiry.
    #[serde(default = "default_dedup_ttl")]
    pub ttl_secs: u64,

    #[serde(default)]
    pub fingerprint: FingerprintPolicy,
}

fn default_dedup_capacity() -> usize {
    4096
}

fn default_dedup_ttl() -> u64 {
    6 * 60 * 60
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            capacity: default_dedup_capacity(),
            ttl_secs: default_dedup_ttl(),
            fingerprint: FingerprintPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchConfig {
    /// Connection attempts before the watcher gives up.
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Verify each enabled backend answers before streaming.
    #[serde(default = "default_true")]
    pub check_backends: bool,

    /// Skip matched lines whose file is already gone.
    #[serde(default = "default_true")]
    pub skip_missing_files: bool,
}

fn default_max_connect_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    30_000
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            max_connect_attempts: default_max_connect_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            check_backends: true,
            skip_missing_files: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleConfig {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Regex matched against the message text of an error line.
    pub pattern: String,

    pub action: ActionSpec,
}

/// Serialized form of an action tree.
///
/// ```toml
/// action = { verb = "REPAIR", on_success = "DELETE", on_failure = { verb = "REMUX", on_success = "DELETE", on_failure = "REPLACE" } }
/// ```
///
/// A bare string is a leaf. `then` runs the same subtree whatever the
/// outcome and cannot be combined with `on_success`/`on_failure`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ActionSpec {
    Verb(String),
    Node(ActionNodeSpec),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ActionNodeSpec {
    pub verb: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<Box<ActionSpec>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<Box<ActionSpec>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then: Option<Box<ActionSpec>>,
}
