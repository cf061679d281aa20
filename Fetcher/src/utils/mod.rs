//! Utility functions and helpers.

pub mod http;
#[cfg(feature = "cli")]
pub mod logging;

use std::path::Path;

use chrono::{DateTime, Utc};

/// Render a path relative to `root` with forward slashes, for storing in
/// records that must stay valid when the project directory moves.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Start of the first-run lookback window.
///
/// `None` when disabled, or when the window reaches past the earliest
/// representable date, which keeps everything.
pub fn lookback_cutoff(now: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    if days == 0 {
        return None;
    }
    chrono::Duration::try_days(i64::from(days)).and_then(|window| now.checked_sub_signed(window))
}
