//! Epoch-millisecond timestamps, the unit every cache key speaks.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

/// Current wall-clock time.
pub fn now_millis() -> Millis {
    to_millis(OffsetDateTime::now_utc())
}

pub fn to_millis(instant: OffsetDateTime) -> Millis {
    (instant.unix_timestamp_nanos() / 1_000_000) as Millis
}

/// Render a timestamp as RFC 3339, or the raw number when it is out of range.
pub fn format_millis(millis: Millis) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|instant| instant.format(&Rfc3339).ok())
        .unwrap_or_else(|| millis.to_string())
}
