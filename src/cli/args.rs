//! CLI argument definitions using clap derive

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// streamcache - Cache for partially available streams
///
/// Fetches resources into a local cache and lets readers consume them
/// while the download is still running.
#[derive(Parser, Debug)]
#[command(name = "streamcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STREAMCACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cache directory (overrides cache.dir)
    #[arg(long, global = true, env = "STREAMCACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch a resource into the cache
    Fetch(FetchArgs),

    /// Write a cached resource to stdout, fetching it if needed
    Cat(CatArgs),

    /// List cached entries
    List(ListArgs),

    /// Remove entries not used for a number of days
    Gc(GcArgs),

    /// Remove every cached entry
    Clear(ClearArgs),

    /// Show or edit configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Where to fetch a resource from
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Download from this URL
    #[arg(long, conflicts_with = "file")]
    pub url: Option<String>,

    /// Read from this local file
    #[arg(long)]
    pub file: Option<PathBuf>,
}

impl SourceArgs {
    /// Whether a source was given
    pub fn is_given(&self) -> bool {
        self.url.is_some() || self.file.is_some()
    }
}

/// Arguments for the fetch command
#[derive(Parser, Debug)]
#[command(group(clap::ArgGroup::new("source").required(true).args(["url", "file"])))]
pub struct FetchArgs {
    /// Identity to cache the resource under
    pub identity: String,

    #[command(flatten)]
    pub source: SourceArgs,
}

/// Arguments for the cat command
#[derive(Parser, Debug)]
pub struct CatArgs {
    /// Identity of the resource
    pub identity: String,

    /// Fetch from here if not cached yet
    #[command(flatten)]
    pub source: SourceArgs,

    /// Start writing at this byte offset
    #[arg(long, default_value = "0")]
    pub offset: u64,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the gc command
#[derive(Parser, Debug)]
pub struct GcArgs {
    /// Remove entries untouched for N days (default: from config)
    #[arg(long)]
    pub days: Option<u32>,

    /// Dry run - show what would be removed
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the clear command
#[derive(Parser, Debug)]
pub struct ClearArgs {
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., cache.max_size_mb)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Arguments for the completions command
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}

/// Output format for list command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
