//! Output functions for consistent CLI formatting

use super::context::UiContext;
use console::style;
use std::io::{self, BufRead, Write};

/// Display a success step
pub fn step_ok(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        eprintln!("{} {}", style("✓").green(), message);
    } else {
        eprintln!("{} {}", style("[OK]").green(), message);
    }
}

/// Display a success step with detail
pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    step_ok(ctx, &format!("{} {}", message, style(detail).dim()));
}

/// Display an informational step
pub fn step_info(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        eprintln!("{} {}", style("●").cyan(), message);
    } else {
        eprintln!("{} {}", style("[INFO]").cyan(), message);
    }
}

/// Display a warning with a hint on the next line
pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    if ctx.use_fancy_output() {
        eprintln!("{} {}", style("▲").yellow(), message);
        eprintln!("  {}", style(hint).dim());
    } else {
        eprintln!("{} {}", style("[WARN]").yellow(), message);
        eprintln!("  {}", hint);
    }
}

/// Display an error with detail
pub fn step_error_detail(ctx: &UiContext, message: &str, detail: &str) {
    let marker = if ctx.use_fancy_output() {
        style("✗").red()
    } else {
        style("[ERROR]").red()
    };
    eprintln!("{} {}: {}", marker, message, detail);
}

/// Ask a yes/no question on stdin, defaulting to no
///
/// Returns true without asking when auto-yes is set.
pub fn confirm(ctx: &UiContext, question: &str) -> io::Result<bool> {
    if ctx.auto_yes() {
        return Ok(true);
    }

    eprint!("{} [y/N] ", question);
    io::stderr().flush()?;

    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
