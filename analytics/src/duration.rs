use std::time::Duration;

const SECOND: u64 = 1_000;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;
// Fixed-length approximations, not calendar months and years
const MONTH: u64 = 30 * DAY;
const YEAR: u64 = 365 * DAY;

const UNITS: &[(u64, &str)] = &[
    (YEAR, "year"),
    (MONTH, "month"),
    (WEEK, "week"),
    (DAY, "day"),
    (HOUR, "hour"),
    (MINUTE, "minute"),
    (SECOND, "second"),
];

/// Renders a millisecond count as e.g. `1 week, 2 days, 3 hours`.
///
/// Each unit takes as much of the remainder as fits, largest first, and only
/// non-zero units are listed. Sub-second remainders are dropped.
pub fn format_duration(ms: u64) -> String {
    let mut remaining = ms;
    let mut parts = Vec::new();

    for &(size, name) in UNITS {
        let count = remaining / size;
        if count > 0 {
            remaining %= size;
            let plural = if count == 1 { "" } else { "s" };
            parts.push(format!("{count} {name}{plural}"));
        }
    }

    if parts.is_empty() {
        return "0 seconds".to_string();
    }
    parts.join(", ")
}

pub fn format_std_duration(duration: Duration) -> String {
    format_duration(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
