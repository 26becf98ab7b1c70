//! Clear command - remove every cached entry

use super::{blocking, entries_label, open_cache};
use crate::cli::args::ClearArgs;
use crate::config::Config;
use crate::error::{StreamCacheError, StreamCacheResult};
use crate::ui::{self, UiContext};
use console::style;

/// Execute the clear command
pub async fn execute(args: ClearArgs, config: &Config) -> StreamCacheResult<()> {
    let ctx = UiContext::detect().with_auto_yes(args.yes);

    let task_config = config.clone();
    let entries = blocking(move || Ok(open_cache(&task_config)?.entries())).await?;

    if entries.is_empty() {
        ui::step_info(&ctx, "No cached entries to clear.");
        return Ok(());
    }

    eprintln!("This will remove {}:", entries_label(entries.len()));
    for entry in &entries {
        eprintln!("  {} {}", style("•").red(), entry.identity);
    }

    let confirmed = ui::confirm(&ctx, "Are you sure?")
        .map_err(|e| StreamCacheError::io("reading confirmation", e))?;
    if !confirmed {
        ui::step_info(&ctx, "Aborted.");
        return Ok(());
    }

    let task_config = config.clone();
    let removed = blocking(move || open_cache(&task_config)?.remove(|_| true)).await?;

    ui::step_ok(&ctx, &format!("Cleared {}", entries_label(removed)));
    Ok(())
}
