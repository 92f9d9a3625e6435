mod types;

pub use types::*;

use crate::logline::LineParser;
use crate::rules::RuleTable;
use anyhow::{Context, Result};
use remediarr_av::ToolOverrides;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config = parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    tracing::debug!("Loaded config from {:?}", path);
    Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./remediarr.toml",
        "./config.toml",
        "~/.config/remediarr/config.toml",
        "/etc/remediarr/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    tracing::debug!("No config file found, using defaults");
    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.source.container.is_some() && config.source.log_file.is_some() {
        anyhow::bail!("Set either source.container or source.log_file, not both");
    }

    config
        .line_parser()
        .context("Invalid source.line_pattern")?;

    let mut names = HashSet::new();
    for arr in &config.arrs {
        if !names.insert(arr.name.as_str()) {
            anyhow::bail!("Arr name '{}' is used more than once", arr.name);
        }
        if !arr.enabled {
            continue;
        }
        if arr.api_key.is_empty() {
            anyhow::bail!("Arr '{}' is enabled but has no API key", arr.name);
        }
        reqwest::Url::parse(&arr.url)
            .with_context(|| format!("Arr '{}' has an invalid url: {}", arr.name, arr.url))?;
    }

    if config.dedup.capacity == 0 {
        anyhow::bail!("dedup.capacity must be at least 1");
    }

    if config.watch.max_connect_attempts == 0 {
        anyhow::bail!("watch.max_connect_attempts must be at least 1");
    }

    config.rule_table().context("Invalid rule table")?;

    Ok(())
}

impl Config {
    /// Compile the rule table: custom rules first, then the built-ins.
    pub fn rule_table(&self) -> Result<RuleTable> {
        Ok(RuleTable::from_config(&self.rules, self.builtin_rules)?)
    }

    pub fn line_parser(&self) -> Result<LineParser> {
        Ok(LineParser::new(&self.source.line_pattern)?)
    }

    pub fn tool_overrides(&self) -> ToolOverrides {
        ToolOverrides {
            ffmpeg: self.tools.ffmpeg_path.clone(),
            ffprobe: self.tools.ffprobe_path.clone(),
            mkvmerge: self.tools.mkvmerge_path.clone(),
            timeout: Some(Duration::from_secs(self.tools.timeout_secs)),
        }
    }

    pub fn enabled_arrs(&self) -> impl Iterator<Item = &ArrConfig> {
        self.arrs.iter().filter(|arr| arr.enabled)
    }

    /// Point the first backend of `arr_type` at `url`/`api_key`, adding one
    /// when none is configured. Used for CLI and environment overrides.
    pub fn upsert_arr(&mut self, arr_type: ArrType, url: Option<&str>, api_key: Option<&str>) {
        if url.is_none() && api_key.is_none() {
            return;
        }

        match self.arrs.iter_mut().find(|arr| arr.arr_type == arr_type) {
            Some(arr) => {
                if let Some(url) = url {
                    arr.url = url.to_string();
                }
                if let Some(key) = api_key {
                    arr.api_key = key.to_string();
                }
                arr.enabled = true;
            }
            None => self.arrs.push(ArrConfig::new(
                arr_type,
                url.unwrap_or_default(),
                api_key.unwrap_or_default(),
            )),
        }
    }
}
