//! streamcache - Cache for partially available streams
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::io;
use std::process::ExitCode;
use streamcache::cli::args::ConfigAction;
use streamcache::cli::{commands, Cli, Commands};
use streamcache::config::{Config, ConfigManager};
use streamcache::error::StreamCacheResult;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> StreamCacheResult<()> {
    let cli = Cli::parse();

    // Completions need neither config nor logging
    if let Commands::Completions(args) = cli.command {
        return commands::completions(args).await;
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // A broken config file must not block rewriting it
    let rewriting_config = matches!(
        cli.command,
        Commands::Config(ref args) if matches!(args.action, Some(ConfigAction::Init { force: true }))
    );
    let mut config = if rewriting_config {
        Config::default()
    } else {
        config_manager.load().await?
    };

    init_logging(cli.verbose, &config);
    debug!("Using config {}", config_manager.path().display());

    if let Some(dir) = cli.cache_dir {
        config.cache.dir = Some(dir);
    }

    match cli.command {
        Commands::Completions(_) => unreachable!("Completions handled above"),
        Commands::Fetch(args) => commands::fetch(args, &config).await,
        Commands::Cat(args) => commands::cat(args, &config).await,
        Commands::List(args) => commands::list(args, &config).await,
        Commands::Gc(args) => commands::gc(args, &config).await,
        Commands::Clear(args) => commands::clear(args, &config).await,
        Commands::Config(args) => commands::config(args, &config, &config_manager).await,
    }
}

/// Initialize logging: 0 = warn, 1 = info, 2+ = debug
///
/// `general.verbose` counts as one `-v`. Logs go to stderr.
fn init_logging(verbose: u8, config: &Config) {
    let level = verbose.saturating_add(u8::from(config.general.verbose));
    let filter = match level {
        0 => EnvFilter::new("streamcache=warn"),
        1 => EnvFilter::new("streamcache=info"),
        _ => EnvFilter::new("streamcache=debug"),
    };

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_target(false)
            .without_time()
            .init();
    }
}
