use chrono::{DateTime, NaiveDate, TimeZone, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_date(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Accepts either epoch milliseconds or an RFC 3339 string.
pub fn parse_instant_ms(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => {
            let s = s.trim();
            if let Ok(ms) = s.parse::<i64>() {
                return Some(ms);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc).timestamp_millis());
            }
            // Browsers' datetime-local inputs omit seconds and offset; treat as UTC.
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
        }
        _ => None,
    }
}

/// Validates a calendar date in `YYYY-MM-DD` form.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Next 09:00 UTC strictly after `now_ms`.
pub fn next_morning_ms(now_ms: i64) -> i64 {
    let now = to_date(now_ms);
    let today_nine = now
        .date_naive()
        .and_hms_opt(9, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive));
    match today_nine {
        Some(nine) if nine > now => nine.timestamp_millis(),
        Some(nine) => (nine + chrono::Duration::days(1)).timestamp_millis(),
        None => now_ms + 24 * 60 * 60 * 1000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn now_ms_is_reasonable() {
        let a = now_ms();
        assert!(a > 1_500_000_000_000); // after 2017
        assert!(a < 4_100_000_000_000); // before year ~2100
    }

    #[test]
    fn to_date_epoch() {
        let d = to_date(0);
        assert_eq!(d.timestamp_millis(), 0);
    }

    #[test]
    fn parses_instants_in_both_shapes() {
        assert_eq!(parse_instant_ms(&json!(1_700_000_000_000_i64)), Some(1_700_000_000_000));
        assert_eq!(
            parse_instant_ms(&json!("2024-01-02T03:04:05Z")),
            Some(1_704_164_645_000)
        );
        assert_eq!(
            parse_instant_ms(&json!("2024-01-02T03:04")),
            Some(1_704_164_640_000)
        );
        assert_eq!(parse_instant_ms(&json!("tomorrow")), None);
        assert_eq!(parse_instant_ms(&json!(true)), None);
    }

    #[test]
    fn next_morning_rolls_over_after_nine() {
        // 2024-01-02T03:04:05Z -> same day 09:00
        assert_eq!(next_morning_ms(1_704_164_645_000), 1_704_186_000_000);
        // 2024-01-02T09:00:00Z -> next day 09:00
        assert_eq!(next_morning_ms(1_704_186_000_000), 1_704_272_400_000);
    }

    #[test]
    fn dates_must_be_calendar_valid() {
        assert!(parse_date("2024-02-29").is_some());
        assert!(parse_date("2023-02-29").is_none());
        assert!(parse_date("29/02/2024").is_none());
    }
}
