//! Scalar field parsing
//!
//! Absent or invalid numbers become 0, absent or invalid dates become the
//! decode time.

use chrono::{DateTime, TimeZone, Utc};
use provider_ampache::parse_timestamp;
use std::str::FromStr;

pub fn number<T: FromStr + Default>(text: &str) -> T {
    text.trim().parse().unwrap_or_default()
}

/// Rating on a 0-5 scale; fractional ratings are rounded
pub fn rating(text: &str) -> u8 {
    let value: f32 = number(text);
    if value.is_finite() {
        value.round().clamp(0.0, 5.0) as u8
    } else {
        0
    }
}

pub fn flag(text: &str) -> bool {
    matches!(text.trim(), "1" | "true")
}

/// ISO-8601 or unix seconds
pub fn date(text: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    parse_timestamp(text)
        .or_else(|| {
            text.trim()
                .parse::<i64>()
                .ok()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        })
        .unwrap_or(now)
}

/// `None` for empty text
pub fn optional(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_defaults_to_zero() {
        assert_eq!(number::<u32>("42"), 42);
        assert_eq!(number::<u32>(" 7 "), 7);
        assert_eq!(number::<u32>(""), 0);
        assert_eq!(number::<u32>("abc"), 0);
        assert_eq!(number::<u32>("-3"), 0);
        assert_eq!(number::<u64>("5242880"), 5_242_880);
    }

    #[test]
    fn test_rating() {
        assert_eq!(rating("4"), 4);
        assert_eq!(rating("3.6"), 4);
        assert_eq!(rating("9"), 5);
        assert_eq!(rating(""), 0);
    }

    #[test]
    fn test_flag() {
        assert!(flag("1"));
        assert!(flag("true"));
        assert!(!flag("0"));
        assert!(!flag(""));
    }

    #[test]
    fn test_date_falls_back_to_now() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(
            date("2021-01-09T10:42:34+00:00", now),
            Utc.with_ymd_and_hms(2021, 1, 9, 10, 42, 34).unwrap()
        );
        assert_eq!(date("1600000000", now).timestamp(), 1_600_000_000);
        assert_eq!(date("", now), now);
        assert_eq!(date("yesterday", now), now);
    }

    #[test]
    fn test_optional() {
        assert_eq!(optional("  "), None);
        assert_eq!(optional(" audio/mpeg "), Some("audio/mpeg".to_string()));
    }
}
