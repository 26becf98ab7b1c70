//! Config command - show or edit configuration

use crate::cache::ReadPolicy;
use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{StreamCacheError, StreamCacheResult};
use crate::ui::{self, UiContext};
use std::path::PathBuf;

const VALID_KEYS: [&str; 10] = [
    "general.verbose",
    "general.log_format",
    "cache.dir",
    "cache.max_size_mb",
    "cache.read_policy",
    "cache.read_timeout_secs",
    "cache.gc_days",
    "fetch.chunk_size",
    "fetch.user_agent",
    "fetch.timeout_secs",
];

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    config: &Config,
    manager: &ConfigManager,
) -> StreamCacheResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> StreamCacheResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

async fn init_config(manager: &ConfigManager, force: bool) -> StreamCacheResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());

    Ok(())
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
) -> StreamCacheResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();

    if let Err(e) = apply(&mut config, key, value) {
        ui::step_error_detail(&ctx, "Cannot set config key", &e.to_string());
        eprintln!("Valid keys:");
        for key in VALID_KEYS {
            eprintln!("  {}", key);
        }
        return Err(e);
    }

    manager.save(&config).await?;
    ui::step_ok(&ctx, &format!("Set {} = {}", key, value));

    Ok(())
}

/// Set a dot-separated key on `config`
fn apply(config: &mut Config, key: &str, value: &str) -> StreamCacheResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "verbose"] => config.general.verbose = parse_bool(value)?,
        ["general", "log_format"] => config.general.log_format = parse_log_format(value)?,

        ["cache", "dir"] => {
            config.cache.dir = (!value.is_empty()).then(|| PathBuf::from(value));
        }
        ["cache", "max_size_mb"] => config.cache.max_size_mb = parse_number(value)?,
        ["cache", "read_policy"] => config.cache.read_policy = parse_read_policy(value)?,
        ["cache", "read_timeout_secs"] => config.cache.read_timeout_secs = parse_number(value)?,
        ["cache", "gc_days"] => config.cache.gc_days = parse_number(value)?,

        ["fetch", "chunk_size"] => {
            let size: usize = parse_number(value)?;
            if size == 0 {
                return Err(StreamCacheError::User(
                    "fetch.chunk_size must be greater than 0".to_string(),
                ));
            }
            config.fetch.chunk_size = size;
        }
        ["fetch", "user_agent"] => config.fetch.user_agent = value.to_string(),
        ["fetch", "timeout_secs"] => config.fetch.timeout_secs = parse_number(value)?,

        _ => return Err(StreamCacheError::User(format!("Unknown config key: {}", key))),
    }

    Ok(())
}

fn parse_bool(value: &str) -> StreamCacheResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(StreamCacheError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> StreamCacheResult<T> {
    value
        .parse()
        .map_err(|_| StreamCacheError::User(format!("Invalid number: {}", value)))
}

fn parse_log_format(value: &str) -> StreamCacheResult<String> {
    match value {
        "text" | "json" => Ok(value.to_string()),
        _ => Err(StreamCacheError::User(format!(
            "Invalid log format: {}. Use text/json",
            value
        ))),
    }
}

fn parse_read_policy(value: &str) -> StreamCacheResult<ReadPolicy> {
    match value.to_lowercase().as_str() {
        "available" => Ok(ReadPolicy::Available),
        "fill" => Ok(ReadPolicy::Fill),
        _ => Err(StreamCacheError::User(format!(
            "Invalid read policy: {}. Use available/fill",
            value
        ))),
    }
}
