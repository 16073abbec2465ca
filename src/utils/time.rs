use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

/// Screenshots are named by capture time. Milliseconds keep a `capture_now` that lands in the
/// same second as a tick from overwriting its file.
pub fn screenshot_file_name(timestamp: DateTime<Utc>) -> String {
    format!("screenshot_{}.png", timestamp.format("%Y%m%d_%H%M%S_%3f"))
}

/// Accepts RFC 3339 as well as timestamps without an offset, which are taken to be UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(v) = DateTime::parse_from_rfc3339(value) {
        return Some(v.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|v| Utc.from_utc_datetime(&v))
}

pub fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_timestamp(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {value:?}")))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{parse_timestamp, screenshot_file_name};

    #[test]
    fn test_screenshot_name_contains_millis() {
        let moment = Utc.with_ymd_and_hms(2025, 3, 15, 9, 5, 7).unwrap()
            + chrono::Duration::milliseconds(42);
        assert_eq!(
            screenshot_file_name(moment),
            "screenshot_20250315_090507_042.png"
        );
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 15, 9, 5, 7).unwrap();
        assert_eq!(parse_timestamp("2025-03-15T09:05:07Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-15T11:05:07+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-15T09:05:07.000"), Some(expected));
        assert_eq!(parse_timestamp(" 2025-03-15 09:05:07 "), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
