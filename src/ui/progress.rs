//! Progress display for fetches

use super::context::UiContext;
use crate::cache::format_bytes;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Byte progress of one fetch
///
/// Shows an indicatif bar in interactive mode, a single summary line in CI.
pub struct FetchProgress {
    bar: Option<ProgressBar>,
    label: String,
}

impl FetchProgress {
    /// Start showing progress for `label`
    pub fn new(ctx: &UiContext, label: &str) -> Self {
        let bar = ctx.use_fancy_output().then(|| {
            let bar = ProgressBar::new_spinner();
            bar.set_style(Self::spinner_style());
            bar.set_prefix(label.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });

        Self {
            bar,
            label: label.to_string(),
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("  {spinner:.cyan} Fetching {prefix}  {bytes:.dim} {binary_bytes_per_sec:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("  {spinner:.cyan} Fetching {prefix}  {bar:20.cyan/dim} {bytes}/{total_bytes} {eta:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .progress_chars("━╸─")
    }

    /// Record the fetch state: bytes arrived and total if known
    pub fn update(&self, frontier: u64, expected_size: Option<u64>) {
        let Some(ref bar) = self.bar else {
            return;
        };

        if let Some(total) = expected_size {
            if bar.length() != Some(total) {
                bar.set_style(Self::bar_style());
                bar.set_length(total);
            }
        }
        bar.set_position(frontier);
    }

    /// Finish and clear the progress bar
    pub fn finish(&self, bytes: u64) {
        match self.bar {
            Some(ref bar) => {
                bar.disable_steady_tick();
                bar.finish_and_clear();
            }
            None => eprintln!("Fetched {} ({})", self.label, format_bytes(bytes)),
        }
    }
}
