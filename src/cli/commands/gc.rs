//! Gc command - remove entries not used recently

use super::{blocking, entries_label, open_cache};
use crate::cache::format_bytes;
use crate::cli::args::GcArgs;
use crate::config::Config;
use crate::error::StreamCacheResult;
use crate::ui::{self, UiContext};
use chrono::{Duration, Utc};
use console::style;

/// Execute the gc command
pub async fn execute(args: GcArgs, config: &Config) -> StreamCacheResult<()> {
    let ctx = UiContext::detect();
    let gc_days = args.days.unwrap_or(config.cache.gc_days);

    if gc_days == 0 {
        ui::step_info(&ctx, "Cache GC is disabled (gc_days = 0)");
        return Ok(());
    }

    let cutoff = Utc::now() - Duration::days(i64::from(gc_days));
    let config = config.clone();
    let dry_run = args.dry_run;

    let (stale, removed) = blocking(move || {
        let cache = open_cache(&config)?;
        let stale: Vec<_> = cache
            .entries()
            .into_iter()
            .filter(|entry| entry.last_touched < cutoff)
            .collect();

        let removed = if dry_run || stale.is_empty() {
            0
        } else {
            cache.remove(|entry| entry.last_touched() < cutoff)?
        };
        Ok((stale, removed))
    })
    .await?;

    if stale.is_empty() {
        ui::step_info(&ctx, &format!("No entries unused for {} days.", gc_days));
        return Ok(());
    }

    eprintln!(
        "Found {} unused for {} days:",
        entries_label(stale.len()),
        gc_days
    );
    for entry in &stale {
        let age_days = (Utc::now() - entry.last_touched).num_days();
        eprintln!(
            "  {} {} ({}, {} days old)",
            style("•").red(),
            entry.identity,
            format_bytes(entry.size),
            age_days
        );
    }

    if dry_run {
        ui::step_info(&ctx, "Dry run - no entries removed.");
        return Ok(());
    }

    ui::step_ok(&ctx, &format!("Removed {}", entries_label(removed)));
    Ok(())
}
