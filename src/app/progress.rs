//! Batch progress bar.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar over `total` identifiers, hidden when `visible` is false.
pub(crate) fn batch_progress(visible: bool, total: usize) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{pos}/{len}] {wide_bar} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}
