//! Utility functions for timestamp formatting

use time::macros::format_description;
use time::OffsetDateTime;

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    let format = format_description!("[day].[month].[year] - [hour]:[minute]:[second]");
    dt.format(format).unwrap_or_else(|_| dt.to_string())
}

/// Optional timestamp for log lines
pub fn format_optional(dt: Option<&OffsetDateTime>) -> String {
    dt.map(format_datetime).unwrap_or_else(|| "-".to_string())
}

/// Current time in the local offset, or UTC when the offset cannot be
/// determined (e.g. multi-threaded processes on some platforms).
pub fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Timestamp fragment that is safe to embed in a file name.
///
/// RFC 3339 style date and time with millisecond precision and the colons
/// removed, e.g. `2024-05-01T120000.250+0300`.
pub fn file_stamp(dt: &OffsetDateTime) -> String {
    let format = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3][offset_hour sign:mandatory]:[offset_minute]"
    );
    let formatted = dt
        .format(format)
        .unwrap_or_else(|_| dt.unix_timestamp().to_string());
    formatted.replace(':', "")
}
