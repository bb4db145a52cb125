//! Timestamp utilities

use chrono::{DateTime, NaiveDateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parse a store timestamp
///
/// Accepts RFC 3339 (`2024-05-01T10:00:00Z`, `...+00:00`) and naive ISO 8601
/// without an offset (`2024-05-01T10:00:00.123456`, also with a space
/// separator), which is read as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    // Postgres renders offsets as "+00" which RFC 3339 rejects
    for format in ["%Y-%m-%dT%H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }

    None
}

/// Convert fractional hours to a chrono duration
///
/// Non-positive and NaN inputs give zero; values past the representable
/// range saturate at `Duration::MAX`.
pub fn hours(value: f64) -> chrono::Duration {
    if value.is_nan() || value <= 0.0 {
        return chrono::Duration::zero();
    }
    // `as` saturates at i64::MAX for huge and infinite inputs
    let secs = (value * 3600.0).round() as i64;
    chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01 00:00:00 UTC
    }

    #[test]
    fn test_parse_rfc3339() {
        let parsed = parse_timestamp("2024-05-01T10:00:00Z").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());

        let offset = parse_timestamp("2024-05-01T12:00:00+02:00").unwrap();
        assert_eq!(offset, parsed);
    }

    #[test]
    fn test_parse_naive_iso_as_utc() {
        let parsed = parse_timestamp("2024-05-01T10:00:00.250000").unwrap();
        assert_eq!(parsed.timestamp(), Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap().timestamp());

        assert!(parse_timestamp("2024-05-01 10:00:00").is_some());
    }

    #[test]
    fn test_parse_postgres_short_offset() {
        let parsed = parse_timestamp("2024-05-01 10:00:00+00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_hours() {
        assert_eq!(hours(6.0), chrono::Duration::hours(6));
        assert_eq!(hours(0.5), chrono::Duration::minutes(30));
    }

    #[test]
    fn test_hours_out_of_range() {
        assert_eq!(hours(f64::NAN), chrono::Duration::zero());
        assert_eq!(hours(-3.0), chrono::Duration::zero());
        assert_eq!(hours(1e10), chrono::Duration::seconds(36_000_000_000_000));
        assert_eq!(hours(1e20), chrono::Duration::MAX);
        assert_eq!(hours(f64::INFINITY), chrono::Duration::MAX);

        // Past the representable date range; callers use checked arithmetic
        assert!(now().checked_sub_signed(hours(1e10)).is_none());
    }
}
