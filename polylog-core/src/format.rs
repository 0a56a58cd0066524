//! Formatting helpers shared across sources.

use chrono::{DateTime, TimeZone, Utc};
use std::time::SystemTime;

/// Maximum length of a listing's first message, in characters.
pub const FIRST_MESSAGE_MAX_CHARS: usize = 200;

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Convert epoch milliseconds into UTC.
pub fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Convert a filesystem time into UTC.
pub fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Prepare a first user message for a listing row.
pub fn listing_text(text: &str) -> String {
    truncate_chars(text.trim(), FIRST_MESSAGE_MAX_CHARS)
}

/// Last path component, used as a project display name.
pub fn display_name_for(path: &std::path::Path) -> String {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}
