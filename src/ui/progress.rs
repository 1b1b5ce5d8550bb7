//! Progress indicators with CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// A task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    /// Start the spinner with a message
    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = ProgressBar::new_spinner();
            if let Ok(template) = ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}  {elapsed:.dim}")
            {
                spinner.set_style(template.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
            }
            spinner.set_message(message.to_string());
            spinner.enable_steady_tick(Duration::from_millis(120));
            self.spinner = Some(spinner);
        } else {
            eprintln!("{} {}", style("...").dim(), message);
        }
    }

    /// Stop with success message
    ///
    /// Status lines go to stderr; stdout carries only command results.
    pub fn stop(&mut self, message: &str) {
        self.clear();
        eprintln!("{}", self.status_line(true, message));
    }

    /// Stop with error message
    pub fn stop_error(&mut self, message: &str) {
        self.clear();
        eprintln!("{}", self.status_line(false, message));
    }

    fn status_line(&self, ok: bool, message: &str) -> String {
        let mark = match (ok, self.interactive) {
            (true, true) => style("✓").green(),
            (true, false) => style("[OK]").green(),
            (false, true) => style("✗").red(),
            (false, false) => style("[FAIL]").red(),
        };
        format!("{mark} {message}")
    }

    /// Clear the spinner without any message
    pub fn clear(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

impl Drop for TaskSpinner {
    fn drop(&mut self) {
        self.clear();
    }
}
