//! Command implementations for fc-fixture

pub mod config;
pub mod firmware;
pub mod session;

pub use config::show_config;
pub use firmware::{flash_release, flash_test, reboot, version};
pub use session::{psense, run};

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Spinner for long non-interactive waits
pub(crate) fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
