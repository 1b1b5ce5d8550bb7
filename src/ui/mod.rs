//! Terminal output for the CLI
//!
//! Styled step lines and a spinner when attached to a terminal, plain
//! `[OK]`/`[FAIL]` lines in CI and when output is piped.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{key_value, section, step_ok, step_ok_detail, step_warn};
pub use progress::TaskSpinner;
