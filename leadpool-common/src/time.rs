//! Timestamp utilities
//!
//! All timestamps are stored in the database as TEXT in a fixed UTC format
//! that sorts lexicographically, so SQL `MIN`/`ORDER BY` over the column
//! agrees with chronological order.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Storage format for all persisted timestamps.
const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage (fixed-width, lexicographically sortable)
pub fn format_utc(ts: DateTime<Utc>) -> String {
    ts.format(STORAGE_FORMAT).to_string()
}

/// Parse a stored timestamp back into a `DateTime<Utc>`
pub fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, STORAGE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse a timestamp from source data.
///
/// Accepts the storage format, RFC 3339, bare `YYYY-MM-DD HH:MM:SS`, and a
/// bare date (midnight UTC). Returns None for anything else.
pub fn parse_flexible(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(ts) = parse_utc(s) {
        return Some(ts);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    None
}
