//! Formatting helpers for CLI output

use chrono::{Local, TimeZone};

/// Format a Unix timestamp in milliseconds as local time
pub fn format_timestamp(ms: i64) -> String {
    match Local.timestamp_millis_opt(ms).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => ms.to_string(),
    }
}

/// Shorten a string to a maximum length
///
/// If the string is longer than `max_len`, it will be truncated
/// with "..." appended. Otherwise, the original string is returned.
///
/// # Example
/// ```ignore
/// assert_eq!(shorten_string("hello", 10), "hello");
/// assert_eq!(shorten_string("hello world", 8), "hello...");
/// ```
pub fn shorten_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
