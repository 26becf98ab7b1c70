//! Terminal output helpers
//!
//! Status lines go to stderr so `streamcache cat` can own stdout. Fancy
//! output (colors, progress bars) is used only in interactive terminals.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{confirm, step_error_detail, step_info, step_ok, step_ok_detail, step_warn_hint};
pub use progress::FetchProgress;
