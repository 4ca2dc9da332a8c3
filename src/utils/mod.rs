//! Common utilities and helper functions

pub mod retry;

use chrono::Duration;

/// Format a duration as a compact human-readable string (e.g. `1h 05m`)
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds();
    let sign = if total < 0 { "-" } else { "" };
    let total = total.abs();

    let hours = total / 3600;
    let mins = (total % 3600) / 60;
    let secs = total % 60;

    match (hours, mins, secs) {
        (0, 0, s) => format!("{sign}{s}s"),
        (0, m, 0) => format!("{sign}{m}m"),
        (0, m, s) => format!("{sign}{m}m {s:02}s"),
        (h, m, _) => format!("{sign}{h}h {m:02}m"),
    }
}
