//! Timestamp helpers.
//!
//! Timestamps are persisted as RFC 3339 UTC strings with millisecond
//! precision and a trailing `Z`. The format is fixed-width for a given
//! century, so the TEXT columns compare chronologically and `run_at <= now`
//! can be evaluated directly in SQL.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{QueueError, QueueResult};

/// Current wall-clock time.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Renders a timestamp in the persisted format.
#[must_use]
pub fn format(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a timestamp in the persisted format.
pub fn parse(s: &str) -> QueueResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| QueueError::corrupt(format!("timestamp '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_uses_millis_and_z_suffix() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap();
        assert_eq!(format(ts), "2024-05-01T12:30:45.000Z");
    }

    #[test]
    fn round_trip() {
        let ts = now();
        let parsed = parse(&format(ts)).unwrap();
        // Sub-millisecond precision is dropped by the format.
        assert!((ts - parsed).num_milliseconds().abs() <= 1);
    }

    #[test]
    fn formatted_strings_order_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 1).unwrap();
        assert!(format(early) < format(late));
    }

    #[test]
    fn garbage_is_a_corruption_error() {
        let err = parse("not-a-timestamp").unwrap_err();
        assert_eq!(err.error_code(), "STORE_CORRUPT");
    }
}
