use chrono::{DateTime, Duration, DurationRound, SubsecRound, Utc};

/// Determine where a refresh should start listing bins.
///
/// Policy:
/// - Look back `window` from `now`.
/// - Truncate to the whole hour so consecutive runs within the same hour ask
///   the dashboard for the same range.
pub fn determine_poll_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let start = now - window;
    start.duration_trunc(Duration::hours(1)).unwrap_or(start)
}

/// Wall-clock now without sub-second noise, so timestamps written to the
/// state files are stable to the second.
pub fn now_secs() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Render a duration as `H:MM:SS`, prefixed with `-` when negative.
pub fn format_hms(d: Duration) -> String {
    let sign = if d < Duration::zero() { "-" } else { "" };
    let total = d.num_seconds().abs();
    format!("{}{}:{:02}:{:02}", sign, total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn poll_start_is_hour_aligned() {
        let now = Utc.with_ymd_and_hms(2024, 6, 12, 14, 37, 52).unwrap();
        assert_eq!(
            determine_poll_start(now, Duration::hours(3)),
            Utc.with_ymd_and_hms(2024, 6, 12, 11, 0, 0).unwrap()
        );
    }

    #[test]
    fn formats_hours_minutes_seconds() {
        assert_eq!(format_hms(Duration::minutes(60)), "1:00:00");
        assert_eq!(format_hms(Duration::seconds(26 * 3600 + 61)), "26:01:01");
        assert_eq!(format_hms(Duration::seconds(-90)), "-0:01:30");
    }
}
