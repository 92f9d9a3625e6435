use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "remediarr")]
#[command(author, version, about = "Watches Bazarr logs and remediates broken media")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "REMEDIARR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase logging verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Overrides for where lines come from and which backends to call.
#[derive(Args, Debug, Default, Clone)]
pub struct SourceArgs {
    /// Docker container running Bazarr
    #[arg(long, env = "BAZARR_CONTAINER", conflicts_with = "log_file")]
    pub container: Option<String>,

    /// Bazarr log file to follow instead of a container
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Radarr base URL
    #[arg(long, env = "RADARR_HOST")]
    pub radarr_url: Option<String>,

    /// Radarr API key
    #[arg(long, env = "RADARR_KEY", hide_env_values = true)]
    pub radarr_key: Option<String>,

    /// Sonarr base URL
    #[arg(long, env = "SONARR_HOST")]
    pub sonarr_url: Option<String>,

    /// Sonarr API key
    #[arg(long, env = "SONARR_KEY", hide_env_values = true)]
    pub sonarr_key: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Follow the Bazarr log and remediate errors as they appear
    Watch {
        #[command(flatten)]
        source: SourceArgs,

        /// Process the existing log history before following
        #[arg(long)]
        replay: bool,
    },

    /// Process the current log history once and exit
    Scan {
        #[command(flatten)]
        source: SourceArgs,

        /// Show what would be done without executing
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the loaded rule table
    CheckRules {
        /// Classify a sample log line or message against the table
        #[arg(long)]
        line: Option<String>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
