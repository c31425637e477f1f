use chrono::{DateTime, SecondsFormat, Utc};

/// End time the backend reports for runs that have not finished.
pub const ZERO_TIME_SENTINEL: &str = "0001-01-01T00:00:00Z";

/// Milliseconds since the epoch, or 0 when the value is blank or unparseable.
pub fn parse_timestamp_millis(value: &str) -> i64 {
    parse_timestamp(value)
        .map(|parsed| parsed.timestamp_millis())
        .unwrap_or(0)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|parsed| parsed.with_timezone(&Utc))
        .ok()
}

/// True for end times that mark an actually finished run.
pub fn has_real_end_time(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") => false,
        Some(end) if end == ZERO_TIME_SENTINEL => false,
        Some(end) => match parse_timestamp(end) {
            Some(parsed) => parsed.timestamp() > 0,
            None => true,
        },
    }
}

pub fn now_rfc3339() -> String {
    format_rfc3339(Utc::now())
}

pub fn format_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
