//! List command - show cached entries

use super::{blocking, entries_label, open_cache};
use crate::cache::{format_bytes, CacheSizeStatus, EntryInfo, FetchState};
use crate::cli::args::{ListArgs, OutputFormat};
use crate::config::Config;
use crate::error::StreamCacheResult;
use crate::ui::{self, UiContext};
use console::style;

/// Execute the list command
pub async fn execute(args: ListArgs, config: &Config) -> StreamCacheResult<()> {
    let task_config = config.clone();
    let (entries, max_size) = blocking(move || {
        let cache = open_cache(&task_config)?;
        Ok((cache.entries(), cache.max_size()))
    })
    .await?;

    if entries.is_empty() {
        match args.format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => ui::step_info(&UiContext::detect(), "Cache is empty"),
        }
        return Ok(());
    }

    match args.format {
        OutputFormat::Table => print_table(&entries, max_size),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.identity);
            }
        }
    }

    Ok(())
}

fn print_table(entries: &[EntryInfo], max_size: u64) {
    println!(
        "{:<40} {:<10} {:<10} {:<20}",
        style("IDENTITY").bold(),
        style("SIZE").bold(),
        style("STATE").bold(),
        style("LAST USED").bold()
    );
    println!("{}", "-".repeat(80));

    for entry in entries {
        let state = match entry.state {
            FetchState::Complete => style("complete").green(),
            FetchState::Fetching | FetchState::Pending => style("fetching").yellow(),
            FetchState::Failed => style("failed").red(),
        };

        println!(
            "{:<40} {:<10} {:<10} {:<20}",
            truncate(&entry.identity, 40),
            format_bytes(entry.size),
            state,
            entry.last_touched.format("%Y-%m-%d %H:%M")
        );
    }

    let total: u64 = entries.iter().map(|e| e.size).sum();
    println!();
    println!("Total: {}, {}", entries_label(entries.len()), usage(total, max_size));
}

fn usage(total: u64, max_size: u64) -> String {
    if max_size == 0 {
        return format!("{} (no limit)", format_bytes(total));
    }

    let text = format!(
        "{} of {} ({:.0}%)",
        format_bytes(total),
        format_bytes(max_size),
        CacheSizeStatus::percentage(total, max_size)
    );
    match CacheSizeStatus::from_usage(total, max_size) {
        CacheSizeStatus::Ok => text,
        CacheSizeStatus::Warning => style(text).yellow().to_string(),
        CacheSizeStatus::Exceeded => style(text).red().to_string(),
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let head: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", head)
}
