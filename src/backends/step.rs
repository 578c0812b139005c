// SPDX-License-Identifier: Apache-2.0

//! Step and duration helpers shared by the metric backends.

use std::time::Duration;

use queryhub_core::TimeRange;

/// Default number of points a range query resolves to when the request does not say
pub const DEFAULT_MAX_DATA_POINTS: u64 = 1000;

const MIN_STEP: Duration = Duration::from_secs(1);

/// Parses a Prometheus-style duration (`500ms`, `15s`, `1m`, `2h`, `1d`, `1w`).
///
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(secs) = input.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "h" => Duration::from_secs(value.checked_mul(3600)?),
            "d" => Duration::from_secs(value.checked_mul(86_400)?),
            "w" => Duration::from_secs(value.checked_mul(604_800)?),
            _ => return None,
        };
        total = total.checked_add(part)?;
    }
    Some(total)
}

/// Formats a duration the way backends print steps (`15s`, `1m30s`, `250ms`).
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }
    if total_ms % 1000 != 0 {
        return format!("{total_ms}ms");
    }

    let mut secs = duration.as_secs();
    let mut out = String::new();
    for (unit, size) in [("h", 3600), ("m", 60), ("s", 1)] {
        if secs >= size {
            out.push_str(&format!("{}{unit}", secs / size));
            secs %= size;
        }
    }
    out
}

/// Resolves the step of a range query.
///
/// An explicit step wins. Otherwise the range is divided into at most
/// `max_data_points` points, never finer than `interval_ms` (or one second).
pub fn calculate_step(
    explicit: Option<Duration>,
    range: &TimeRange,
    max_data_points: Option<u64>,
    interval_ms: Option<u64>,
) -> Duration {
    if let Some(step) = explicit.filter(|s| !s.is_zero()) {
        return step;
    }

    let points = max_data_points
        .filter(|p| *p > 0)
        .unwrap_or(DEFAULT_MAX_DATA_POINTS);
    let range_ms = range.duration().num_milliseconds().max(0) as u64;
    let safe = Duration::from_millis(range_ms.div_ceil(points));
    let floor = interval_ms
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(MIN_STEP);

    safe.max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn hour_range() -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
        )
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(parse_duration("15s"), Some(Duration::from_secs(15)));
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("5x"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn out_of_range_durations_are_rejected() {
        assert_eq!(parse_duration("1e30"), None);
        assert_eq!(parse_duration("-5"), None);
        assert_eq!(parse_duration("NaN"), None);
        assert_eq!(parse_duration("18446744073709551615s1s"), None);
        assert_eq!(parse_duration("18446744073709551615m"), None);
        assert_eq!(parse_duration("99999999999999999999s"), None);
    }

    #[test]
    fn formats_durations_compactly() {
        assert_eq!(format_duration(Duration::from_secs(15)), "15s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
    }

    #[test]
    fn explicit_step_wins() {
        let step = calculate_step(Some(Duration::from_secs(30)), &hour_range(), Some(10), None);
        assert_eq!(step, Duration::from_secs(30));
    }

    #[test]
    fn step_is_derived_from_data_points() {
        // 3600s / 100 points = 36s
        let step = calculate_step(None, &hour_range(), Some(100), None);
        assert_eq!(step, Duration::from_secs(36));
    }

    #[test]
    fn step_never_drops_below_interval_floor() {
        let step = calculate_step(None, &hour_range(), Some(1_000_000), None);
        assert_eq!(step, Duration::from_secs(1));

        let step = calculate_step(None, &hour_range(), Some(1_000_000), Some(15_000));
        assert_eq!(step, Duration::from_secs(15));
    }
}
