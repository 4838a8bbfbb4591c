//! UTC calendar helpers
//!
//! Record times are Unix seconds. Log files are keyed by UTC calendar day.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Seconds in one calendar day
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Calendar day (UTC) containing a Unix time
///
/// Times beyond the calendar's range clamp to its first or last day.
pub fn utc_day(timestamp: i64) -> NaiveDate {
    match DateTime::from_timestamp(timestamp, 0) {
        Some(time) => time.date_naive(),
        None if timestamp < 0 => NaiveDate::MIN,
        None => NaiveDate::MAX,
    }
}

/// Unix time of 00:00:00 UTC on `day`
pub fn day_start(day: NaiveDate) -> i64 {
    (day.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE) as i64 * SECONDS_PER_DAY
}

/// Hour of day (UTC), 0..=23
pub fn hour_of_day(timestamp: i64) -> u32 {
    (timestamp.rem_euclid(SECONDS_PER_DAY) / 3600) as u32
}

pub fn previous_day(day: NaiveDate) -> NaiveDate {
    day.pred_opt().unwrap_or(day)
}

/// `YYYYMMDD` as used in file names
pub fn day_stamp(day: NaiveDate) -> String {
    day.format("%Y%m%d").to_string()
}

/// Parse a `YYYYMMDD` stamp
pub fn parse_day_stamp(stamp: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(stamp, "%Y%m%d").ok()
}

/// Unix time from the six integer fields used in the log framing
pub fn from_fields(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<i64> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = date.and_hms_opt(hour, min, sec)?;
    Some(time.and_utc().timestamp())
}

/// Six integer fields (Y M D h m s) of a Unix time
pub fn to_fields(timestamp: i64) -> [i64; 6] {
    let time = datetime(timestamp);
    [
        time.year() as i64,
        time.month() as i64,
        time.day() as i64,
        time.hour() as i64,
        time.minute() as i64,
        time.second() as i64,
    ]
}

/// Whether a Unix time falls inside the calendar's range
pub fn is_representable(timestamp: i64) -> bool {
    DateTime::from_timestamp(timestamp, 0).is_some()
}

/// Human readable UTC form, for logs and CLI output
pub fn display(timestamp: i64) -> String {
    datetime(timestamp).format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn datetime(timestamp: i64) -> NaiveDateTime {
    DateTime::from_timestamp(timestamp, 0)
        .map(|t| t.naive_utc())
        .unwrap_or_default()
}

const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_boundaries() {
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let start = day_start(day);
        assert_eq!(start, 1_717_200_000);
        assert_eq!(utc_day(start), day);
        assert_eq!(utc_day(start - 1), NaiveDate::from_ymd_opt(2024, 5, 31).unwrap());
        assert_eq!(utc_day(start + SECONDS_PER_DAY - 1), day);
    }

    #[test]
    fn test_pre_epoch_days() {
        let day = NaiveDate::from_ymd_opt(1969, 12, 31).unwrap();
        assert_eq!(utc_day(-1), day);
        assert_eq!(day_start(day), -SECONDS_PER_DAY);
        assert_eq!(hour_of_day(-1), 23);
    }

    #[test]
    fn test_out_of_range_days_clamp() {
        assert_eq!(utc_day(i64::MAX), NaiveDate::MAX);
        assert_eq!(utc_day(i64::MIN), NaiveDate::MIN);
        assert!(is_representable(0));
        assert!(!is_representable(i64::MAX));
    }

    #[test]
    fn test_fields_round_trip() {
        let t = from_fields(2024, 6, 1, 23, 55, 7).unwrap();
        assert_eq!(to_fields(t), [2024, 6, 1, 23, 55, 7]);
        assert_eq!(hour_of_day(t), 23);
        assert!(from_fields(2024, 2, 30, 0, 0, 0).is_none());
    }

    #[test]
    fn test_day_stamp() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        assert_eq!(day_stamp(day), "20240109");
        assert_eq!(parse_day_stamp("20240109"), Some(day));
        assert_eq!(parse_day_stamp("2024-01-09"), None);
    }
}
