use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

const DATE_TIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%d %B %Y", "%d %b %Y", "%B %d, %Y", "%b %d, %Y"];

/// Parses the date strings found in feeds and advisory listings.
/// Returns `None` for anything unrecognised; callers treat that as "no order".
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATE_TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Short "time ago" label for cards. Unparseable input is echoed back.
pub fn format_relative(raw: &str, now: DateTime<Utc>) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    let Some(date) = parse_timestamp(raw) else {
        return raw.to_string();
    };

    let diff = now.signed_duration_since(date);
    let minutes = diff.num_minutes();
    if minutes < 60 {
        format!("{}m ago", minutes.max(1))
    } else if diff.num_hours() < 24 {
        format!("{}h ago", diff.num_hours())
    } else if diff.num_hours() < 48 {
        "1d ago".to_string()
    } else {
        date.format("%b %-d").to_string()
    }
}
