mod cli;

use remediarr::{
    config::{self, ArrType, Config},
    watch::{StopReason, WatchMode, Watcher},
};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, SourceArgs};
use std::path::Path;
use tokio::signal;
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    // Before parsing so .env values feed clap's env fallbacks.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbosity
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        match cli.verbose {
            0 => "remediarr=info,remediarr_av=info,remediarr_common=info",
            1 => "remediarr=debug,remediarr_av=debug,remediarr_common=debug",
            // Super debug: include HTTP client internals
            _ => "remediarr=trace,remediarr_av=trace,remediarr_common=trace,reqwest=debug,hyper=debug",
        }
        .to_string()
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Watch { source, replay } => {
            let mut config = load(cli.config.as_deref(), &source)?;
            config.source.replay_history |= replay;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_watcher(config, WatchMode::Follow, false))
        }
        Commands::Scan { source, dry_run } => {
            let mut config = load(cli.config.as_deref(), &source)?;
            // A scan covers everything the source still has.
            config.source.replay_history = true;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_watcher(config, WatchMode::Once, dry_run))
        }
        Commands::CheckRules { line } => check_rules(cli.config.as_deref(), line.as_deref()),
        Commands::CheckTools => check_tools(),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("remediarr {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Load config, then layer CLI/env overrides on top and re-validate.
fn load(config_path: Option<&Path>, args: &SourceArgs) -> Result<Config> {
    let mut config = config::load_config_or_default(config_path)?;

    if let Some(container) = &args.container {
        config.source.container = Some(container.clone());
        config.source.log_file = None;
    }
    if let Some(log_file) = &args.log_file {
        config.source.log_file = Some(log_file.clone());
        config.source.container = None;
    }
    config.upsert_arr(
        ArrType::Radarr,
        args.radarr_url.as_deref(),
        args.radarr_key.as_deref(),
    );
    config.upsert_arr(
        ArrType::Sonarr,
        args.sonarr_url.as_deref(),
        args.sonarr_key.as_deref(),
    );

    config::validate_config(&config)?;
    Ok(config)
}

async fn run_watcher(config: Config, mode: WatchMode, dry_run: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = Watcher::from_config(&config, mode, dry_run, cancel.clone())?;

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown requested, finishing current work");
        signal_cancel.cancel();
    });

    let report = watcher.run().await;
    tracing::debug!("Watcher report: {:?}", report.stats);

    match report.reason {
        StopReason::Clean => Ok(()),
        StopReason::Fatal(message) => anyhow::bail!(message),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn check_rules(config_path: Option<&Path>, line: Option<&str>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let table = config.rule_table()?;

    println!("Rules ({}), first match wins:\n", table.len());
    for (i, rule) in table.rules().iter().enumerate() {
        println!("  {}. {}", i + 1, rule.name);
        println!("     pattern: {}", rule.pattern.as_str());
        println!("     action:  {}", rule.action);
    }

    let Some(line) = line else {
        return Ok(());
    };

    // Accept either a raw log line or a bare message.
    let parsed = config.line_parser()?.parse(line);
    let message = parsed.as_ref().map_or(line, |p| p.message.as_str());

    println!();
    match table.find(message) {
        Some(rule) => {
            println!("Matched rule: {}", rule.name);
            println!("Action tree:  {}", rule.action);
        }
        None => println!("No rule matches; the line would pass through."),
    }
    if let Some(path) = parsed.as_ref().and_then(|p| p.file_path.as_ref()) {
        println!("File:         {}", path.display());
    }

    Ok(())
}

fn check_tools() -> Result<()> {
    println!("Checking external tools...\n");

    let tools = remediarr_av::check_tools();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All tools are available!");
    } else {
        println!("Some tools are missing. REPAIR, REMUX or container logs may not work.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("✓ Configuration is valid");
    match (&config.source.container, &config.source.log_file) {
        (Some(container), _) => println!("  Source: container {}", container),
        (None, Some(file)) => println!("  Source: file {}", file.display()),
        (None, None) => println!("  Source: not set (pass --container or --log-file)"),
    }
    println!("  Arr integrations: {}", config.arrs.len());
    for arr in &config.arrs {
        println!(
            "    {} ({}) {}{}",
            arr.name,
            arr.arr_type.as_str(),
            arr.url,
            if arr.enabled { "" } else { " [disabled]" }
        );
    }
    println!("  Custom rules: {}", config.rules.len());
    println!(
        "    Enabled: {}",
        config.rules.iter().filter(|r| r.enabled).count()
    );
    println!("  Built-in rules: {}", if config.builtin_rules { "on" } else { "off" });
    println!("  Dedup window: {} entries", config.dedup.capacity);

    Ok(())
}
