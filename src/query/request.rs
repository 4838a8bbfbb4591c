//! Read requests and their time-window arithmetic

use crate::query::error::{QueryError, QueryResult};
use crate::storage::calendar::{self, SECONDS_PER_DAY};
use crate::storage::vocab::ProductKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default half-width of the search window
pub const DEFAULT_WINDOW_SECS: i64 = 3600;

/// Default tolerance on the lead time match
pub const DEFAULT_LEAD_TOLERANCE_SECS: i64 = 300;

/// How matches are chosen relative to the target time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// Nearest records on either side of the target
    Closest,
    /// Nearest records at or before the target
    ClosestBefore,
    /// Nearest records at or after the target
    ClosestAfter,
    /// Every record inside the window
    All,
}

impl ReadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadMode::Closest => "closest",
            ReadMode::ClosestBefore => "closest_before",
            ReadMode::ClosestAfter => "closest_after",
            ReadMode::All => "all",
        }
    }
}

impl fmt::Display for ReadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadMode {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "closest" => Ok(ReadMode::Closest),
            "closest_before" | "before" => Ok(ReadMode::ClosestBefore),
            "closest_after" | "after" => Ok(ReadMode::ClosestAfter),
            "all" => Ok(ReadMode::All),
            other => Err(QueryError::InvalidRequest(format!(
                "unknown read mode '{}'",
                other
            ))),
        }
    }
}

/// A time-windowed lookup against one log series
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub mode: ReadMode,
    pub target_time: i64,
    /// Half-width of the window; at most one day
    pub window_seconds: i64,
    pub directory: PathBuf,
    pub suffix: String,
    /// Wanted lead time; 0 means the first object of each record
    pub lead_seconds: i64,
    pub lead_tolerance_seconds: i64,
    /// Only consider records of this type
    pub kind: Option<ProductKind>,
}

impl ReadRequest {
    pub fn new(
        mode: ReadMode,
        target_time: i64,
        directory: impl Into<PathBuf>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            mode,
            target_time,
            window_seconds: DEFAULT_WINDOW_SECS,
            directory: directory.into(),
            suffix: suffix.into(),
            lead_seconds: 0,
            lead_tolerance_seconds: DEFAULT_LEAD_TOLERANCE_SECS,
            kind: None,
        }
    }

    /// Builder: set the window half-width
    pub fn window(mut self, seconds: i64) -> Self {
        self.window_seconds = seconds;
        self
    }

    /// Builder: ask for the object nearest `lead_seconds`
    pub fn lead(mut self, lead_seconds: i64, tolerance_seconds: i64) -> Self {
        self.lead_seconds = lead_seconds;
        self.lead_tolerance_seconds = tolerance_seconds;
        self
    }

    /// Builder: restrict to one record type
    pub fn kind(mut self, kind: ProductKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn validate(&self) -> QueryResult<()> {
        if self.window_seconds < 0 || self.window_seconds > SECONDS_PER_DAY {
            return Err(QueryError::InvalidRequest(format!(
                "window of {} seconds is outside 0..={}",
                self.window_seconds, SECONDS_PER_DAY
            )));
        }
        if self.lead_tolerance_seconds < 0 {
            return Err(QueryError::InvalidRequest(format!(
                "negative lead tolerance {}",
                self.lead_tolerance_seconds
            )));
        }
        if !calendar::is_representable(self.target_time) {
            return Err(QueryError::InvalidRequest(format!(
                "target time {} is outside the calendar range",
                self.target_time
            )));
        }
        if self.suffix.is_empty() {
            return Err(QueryError::InvalidRequest("empty suffix".to_string()));
        }
        Ok(())
    }

    /// Distance from the target if `data_time` lies inside the window
    pub fn time_delta(&self, data_time: i64) -> Option<i64> {
        let before = self.target_time.checked_sub(data_time)?;
        let delta = match self.mode {
            ReadMode::Closest | ReadMode::All => before.checked_abs()?,
            ReadMode::ClosestBefore if before >= 0 => before,
            ReadMode::ClosestAfter if before <= 0 => before.checked_neg()?,
            _ => return None,
        };
        (delta < self.window_seconds).then_some(delta)
    }

    pub fn matches_kind(&self, kind: &ProductKind) -> bool {
        self.kind.as_ref().map_or(true, |wanted| wanted == kind)
    }

    pub fn target_day(&self) -> NaiveDate {
        calendar::utc_day(self.target_time)
    }

    /// First and last instants inside the window, if any
    fn window_bounds(&self) -> Option<(i64, i64)> {
        if self.window_seconds <= 0 {
            return None;
        }
        let reach = self.window_seconds - 1;
        let (low, high) = match self.mode {
            ReadMode::Closest | ReadMode::All => (
                self.target_time.saturating_sub(reach),
                self.target_time.saturating_add(reach),
            ),
            ReadMode::ClosestBefore => (self.target_time.saturating_sub(reach), self.target_time),
            ReadMode::ClosestAfter => (self.target_time, self.target_time.saturating_add(reach)),
        };
        Some((low, high))
    }

    /// Days the window touches, the target's own day first
    pub fn window_days(&self) -> Vec<NaiveDate> {
        let own = self.target_day();
        let mut days = vec![own];
        if let Some((low, high)) = self.window_bounds() {
            for day in [calendar::utc_day(low), calendar::utc_day(high)] {
                if !days.contains(&day) {
                    days.push(day);
                }
            }
        }
        days
    }

    /// The neighbouring day a directional search spills onto, if any
    pub fn spill_day(&self) -> Option<NaiveDate> {
        let (low, high) = self.window_bounds()?;
        let edge = match self.mode {
            ReadMode::ClosestBefore => low,
            ReadMode::ClosestAfter => high,
            ReadMode::Closest | ReadMode::All => return None,
        };
        let day = calendar::utc_day(edge);
        (day != self.target_day()).then_some(day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOON: i64 = 1_717_243_200; // 2024-06-01 12:00:00

    fn request(mode: ReadMode, target: i64) -> ReadRequest {
        ReadRequest::new(mode, target, "/data", "bdry")
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn may_31() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 31).unwrap()
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("closest".parse::<ReadMode>().unwrap(), ReadMode::Closest);
        assert_eq!("before".parse::<ReadMode>().unwrap(), ReadMode::ClosestBefore);
        assert_eq!("Closest-After".parse::<ReadMode>().unwrap(), ReadMode::ClosestAfter);
        assert!("nearest".parse::<ReadMode>().is_err());
        assert_eq!(ReadMode::ClosestBefore.to_string(), "closest_before");
    }

    #[test]
    fn test_validation() {
        assert!(request(ReadMode::All, NOON).validate().is_ok());
        assert!(request(ReadMode::All, NOON).window(SECONDS_PER_DAY).validate().is_ok());

        let err = request(ReadMode::All, NOON)
            .window(SECONDS_PER_DAY + 1)
            .validate()
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidRequest(_)));

        assert!(request(ReadMode::All, NOON).window(-1).validate().is_err());
        assert!(request(ReadMode::All, NOON).lead(60, -1).validate().is_err());
    }

    #[test]
    fn test_time_fit_is_strict() {
        let closest = request(ReadMode::Closest, NOON).window(50);
        assert_eq!(closest.time_delta(NOON), Some(0));
        assert_eq!(closest.time_delta(NOON - 49), Some(49));
        assert_eq!(closest.time_delta(NOON + 49), Some(49));
        assert_eq!(closest.time_delta(NOON + 50), None);

        let before = request(ReadMode::ClosestBefore, NOON).window(50);
        assert_eq!(before.time_delta(NOON), Some(0));
        assert_eq!(before.time_delta(NOON - 10), Some(10));
        assert_eq!(before.time_delta(NOON + 10), None);

        let after = request(ReadMode::ClosestAfter, NOON).window(50);
        assert_eq!(after.time_delta(NOON + 10), Some(10));
        assert_eq!(after.time_delta(NOON - 10), None);

        assert_eq!(request(ReadMode::All, NOON).window(0).time_delta(NOON), None);
    }

    #[test]
    fn test_extreme_times() {
        // index data is not trusted to be sane
        let modes = [
            ReadMode::Closest,
            ReadMode::ClosestBefore,
            ReadMode::ClosestAfter,
            ReadMode::All,
        ];
        for mode in modes {
            let req = request(mode, NOON).window(60);
            assert_eq!(req.time_delta(i64::MIN), None);
            assert_eq!(req.time_delta(i64::MAX), None);
        }
        assert_eq!(request(ReadMode::ClosestAfter, -1).time_delta(i64::MAX), None);

        let far = request(ReadMode::Closest, i64::MAX).window(SECONDS_PER_DAY);
        assert!(matches!(far.validate(), Err(QueryError::InvalidRequest(_))));
        assert!(!far.window_days().is_empty());
        assert_eq!(request(ReadMode::ClosestBefore, i64::MIN).window(3600).spill_day(), None);
    }

    #[test]
    fn test_window_days() {
        assert_eq!(request(ReadMode::Closest, NOON).window_days(), vec![day(1)]);

        let near_midnight = NOON - 11 * 3600; // 01:00
        assert_eq!(
            request(ReadMode::Closest, near_midnight).window(7200).window_days(),
            vec![day(1), may_31()]
        );

        let wide = request(ReadMode::All, NOON).window(SECONDS_PER_DAY);
        assert_eq!(
            wide.window_days(),
            vec![day(1), may_31(), day(2)]
        );
    }

    #[test]
    fn test_spill_day() {
        let early = NOON - 11 * 3600; // 01:00
        let late = NOON + 11 * 3600; // 23:00

        assert_eq!(
            request(ReadMode::ClosestBefore, early).window(7200).spill_day(),
            Some(may_31())
        );
        assert_eq!(request(ReadMode::ClosestAfter, early).window(7200).spill_day(), None);
        assert_eq!(request(ReadMode::ClosestAfter, late).window(7200).spill_day(), Some(day(2)));
        assert_eq!(request(ReadMode::Closest, late).window(7200).spill_day(), None);

        // a window ending exactly at midnight stays on its own day
        let edge = NOON + 12 * 3600 - 3600; // 23:00
        assert_eq!(request(ReadMode::ClosestAfter, edge).window(3600).spill_day(), None);
    }

    #[test]
    fn test_kind_filter() {
        let any = request(ReadMode::All, NOON);
        assert!(any.matches_kind(&ProductKind::Dryline));

        let fronts = any.kind(ProductKind::ColdFront);
        assert!(fronts.matches_kind(&ProductKind::ColdFront));
        assert!(!fronts.matches_kind(&ProductKind::Dryline));
    }
}
