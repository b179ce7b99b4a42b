use anyhow::{anyhow, Result};
use chrono::{Duration, NaiveDate};

/// Pack a date into its integer YYYYMMDD form, the representation stored on
/// every review document so cutoff filters reduce to one integer comparison.
pub fn date_to_int(date: NaiveDate) -> u32 {
    use chrono::Datelike;
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

/// Unpack a YYYYMMDD integer back into a date. Returns `None` for values that
/// do not encode a real calendar date.
pub fn int_to_date(value: u32) -> Option<NaiveDate> {
    let year = (value / 10_000) as i32;
    let month = value / 100 % 100;
    let day = value % 100;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// ISO rendering of a stored date int; falls back to the raw digits when the
/// int is not a valid date (legacy rows keep displaying something).
pub fn int_to_iso(value: u32) -> String {
    match int_to_date(value) {
        Some(date) => date.format("%Y-%m-%d").to_string(),
        None => value.to_string(),
    }
}

/// Strict `YYYY-MM-DD` parsing. A malformed date is the caller's bug and is
/// surfaced as an error instead of being silently replaced by a default.
pub fn parse_iso_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|e| anyhow!("invalid date '{}': {}", text, e))
}

/// Inclusive date range stepped by `step_days`, used to enumerate simulated
/// days. The end date is included when it lands on a step.
pub fn date_range(start: NaiveDate, end: NaiveDate, step_days: u32) -> Vec<NaiveDate> {
    let step = Duration::days(step_days.max(1) as i64);
    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        dates.push(current);
        current += step;
    }
    dates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_int_round_trip() {
        let date = NaiveDate::from_ymd_opt(2020, 12, 10).unwrap();
        assert_eq!(date_to_int(date), 20201210);
        assert_eq!(int_to_date(20201210), Some(date));
        assert_eq!(int_to_iso(20201210), "2020-12-10");
    }

    #[test]
    fn invalid_int_renders_raw_digits() {
        assert_eq!(int_to_date(20201399), None);
        assert_eq!(int_to_iso(20201399), "20201399");
    }

    #[test]
    fn malformed_date_is_an_error_not_a_default() {
        assert!(parse_iso_date("2020-12-10").is_ok());
        assert!(parse_iso_date("12/10/2020").is_err());
        assert!(parse_iso_date("not a date").is_err());
    }

    #[test]
    fn range_includes_both_endpoints_on_step() {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2021, 1, 15).unwrap();
        let dates = date_range(start, end, 7);
        assert_eq!(dates.len(), 3);
        assert_eq!(dates[0], start);
        assert_eq!(dates[2], end);
    }

    #[test]
    fn range_with_single_day() {
        let day = NaiveDate::from_ymd_opt(2021, 6, 1).unwrap();
        assert_eq!(date_range(day, day, 7), vec![day]);
    }
}
