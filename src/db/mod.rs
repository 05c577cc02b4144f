//! Database module - SQLite with sqlx

mod campaigns;
mod jobs;
mod pool;

pub use campaigns::*;
pub use jobs::*;
pub use pool::*;

use chrono::{DateTime, SecondsFormat, Utc};

/// RFC3339 with millisecond precision, matching the schema defaults so
/// lexicographic SQL comparisons and chrono parsing agree.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn now_ts() -> String {
    format_ts(Utc::now())
}

pub(crate) fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_ts_opt(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
