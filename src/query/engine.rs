//! Query Engine
//!
//! Answers a [`ReadRequest`] from the day indexes, reading only the records
//! that can match.
//!
//! # Execution Pipeline
//!
//! ```text
//! Request → Validate → Candidate days → ensure_index → Score entries
//!         → read_at + cross-check → Lead fit → Select → Result
//! ```
//!
//! Matching is two-level. A record first has to fall inside the time
//! window; among those the nearest in time wins. When a lead time is
//! requested the record must also carry an object within tolerance of it,
//! and ties in time are broken by the nearer lead.

use crate::index::{IndexEntry, IndexFile, IndexMaintainer};
use crate::query::error::QueryResult;
use crate::query::request::{ReadMode, ReadRequest};
use crate::storage::calendar;
use crate::storage::error::StoreError;
use crate::storage::log;
use crate::storage::types::ShapeRecord;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Default number of hours past midnight in which an empty result also
/// searches the previous day's log
pub const DEFAULT_MIDNIGHT_FALLBACK_HOURS: u32 = 3;

/// Records found by a query, with what it took to find them
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryOutcome {
    pub records: Vec<ShapeRecord>,
    pub days_searched: usize,
    /// Index entries inside the time window (and of the wanted type)
    pub entries_considered: usize,
    pub records_read: usize,
    /// Records dropped because they disagreed with their index entry
    pub corrupt_skipped: usize,
    pub used_midnight_fallback: bool,
    pub execution_time_ms: u64,
}

impl QueryOutcome {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Work counters for one query
#[derive(Debug, Default)]
struct Tally {
    days: Vec<NaiveDate>,
    entries_considered: usize,
    records_read: usize,
    corrupt_skipped: usize,
}

/// Best match within one day
struct DayBest {
    time_delta: i64,
    lead_delta: i64,
    records: Vec<ShapeRecord>,
}

impl DayBest {
    fn beats(&self, other: &DayBest) -> bool {
        (self.time_delta, self.lead_delta) < (other.time_delta, other.lead_delta)
    }
}

pub struct QueryEngine {
    maintainer: Arc<IndexMaintainer>,
    midnight_fallback_hours: u32,
}

impl QueryEngine {
    pub fn new(maintainer: Arc<IndexMaintainer>) -> Self {
        Self {
            maintainer,
            midnight_fallback_hours: DEFAULT_MIDNIGHT_FALLBACK_HOURS,
        }
    }

    /// Builder: set how long after midnight the previous day is also searched
    pub fn with_midnight_fallback_hours(mut self, hours: u32) -> Self {
        self.midnight_fallback_hours = hours;
        self
    }

    pub fn maintainer(&self) -> &Arc<IndexMaintainer> {
        &self.maintainer
    }

    /// Matching records only
    pub fn query(&self, request: &ReadRequest) -> QueryResult<Vec<ShapeRecord>> {
        Ok(self.execute(request)?.records)
    }

    /// Run a request, returning the records and execution statistics
    pub fn execute(&self, request: &ReadRequest) -> QueryResult<QueryOutcome> {
        let start = Instant::now();
        request.validate()?;

        let mut tally = Tally::default();
        let mut records = match request.mode {
            ReadMode::All => self.collect_all(request, &request.window_days(), &mut tally)?,
            ReadMode::Closest => self.closest_over(request, &request.window_days(), &mut tally)?,
            ReadMode::ClosestBefore | ReadMode::ClosestAfter => {
                let found = self.closest_over(request, &[request.target_day()], &mut tally)?;
                match request.spill_day() {
                    Some(day) if found.is_empty() => {
                        debug!(mode = %request.mode, day = %day, "nothing on own day, trying neighbour");
                        self.closest_over(request, &[day], &mut tally)?
                    }
                    _ => found,
                }
            }
        };

        let mut used_midnight_fallback = false;
        if records.is_empty()
            && calendar::hour_of_day(request.target_time) < self.midnight_fallback_hours
        {
            let previous = calendar::previous_day(request.target_day());
            if !tally.days.contains(&previous) {
                debug!(
                    target = %calendar::display(request.target_time),
                    day = %previous,
                    "no match, searching previous day"
                );
                used_midnight_fallback = true;
                records = match request.mode {
                    ReadMode::All => self.collect_all(request, &[previous], &mut tally)?,
                    _ => self.closest_over(request, &[previous], &mut tally)?,
                };
            }
        }

        Ok(QueryOutcome {
            records,
            days_searched: tally.days.len(),
            entries_considered: tally.entries_considered,
            records_read: tally.records_read,
            corrupt_skipped: tally.corrupt_skipped,
            used_midnight_fallback,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Index for `day`, or `None` when the day has no log
    fn day_index(
        &self,
        request: &ReadRequest,
        day: NaiveDate,
        tally: &mut Tally,
    ) -> QueryResult<Option<Arc<IndexFile>>> {
        tally.days.push(day);
        match self
            .maintainer
            .ensure_index(&request.directory, &request.suffix, day)
        {
            Ok(index) => Ok(Some(index)),
            Err(e) if e.is_not_found() => {
                debug!(day = %day, suffix = %request.suffix, "no log for day");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Best match over `days`; the earliest listed day wins ties
    fn closest_over(
        &self,
        request: &ReadRequest,
        days: &[NaiveDate],
        tally: &mut Tally,
    ) -> QueryResult<Vec<ShapeRecord>> {
        let mut best: Option<DayBest> = None;
        for &day in days {
            let Some(found) = self.best_in_day(request, day, tally)? else {
                continue;
            };
            if best.as_ref().map_or(true, |b| found.beats(b)) {
                best = Some(found);
            }
        }
        Ok(best.map(|b| b.records).unwrap_or_default())
    }

    fn best_in_day(
        &self,
        request: &ReadRequest,
        day: NaiveDate,
        tally: &mut Tally,
    ) -> QueryResult<Option<DayBest>> {
        let Some(index) = self.day_index(request, day, tally)? else {
            return Ok(None);
        };
        let log_path = log::path_for(&request.directory, &request.suffix, day);

        let mut candidates: Vec<(i64, &IndexEntry)> = index
            .entries
            .iter()
            .filter(|e| request.matches_kind(&e.kind))
            .filter_map(|e| request.time_delta(e.data_time).map(|delta| (delta, e)))
            .collect();
        tally.entries_considered += candidates.len();

        // stable, so equal deltas stay in log order
        candidates.sort_by_key(|(delta, _)| *delta);

        let mut rest = candidates.as_slice();
        while let Some(&(time_delta, _)) = rest.first() {
            let split = rest
                .iter()
                .position(|(delta, _)| *delta != time_delta)
                .unwrap_or(rest.len());
            let (group, tail) = rest.split_at(split);
            rest = tail;

            let mut fitted: Vec<(i64, ShapeRecord)> = Vec::new();
            for (_, entry) in group {
                let Some(mut record) = self.materialize(&log_path, entry, tally)? else {
                    continue;
                };
                if let Some((idx, lead_delta)) =
                    record.best_object(request.lead_seconds, request.lead_tolerance_seconds)
                {
                    record.retain_object(idx);
                    fitted.push((lead_delta, record));
                }
            }

            if let Some(lead_delta) = fitted.iter().map(|(delta, _)| *delta).min() {
                let records = fitted
                    .into_iter()
                    .filter(|(delta, _)| *delta == lead_delta)
                    .map(|(_, record)| record)
                    .collect();
                return Ok(Some(DayBest {
                    time_delta,
                    lead_delta,
                    records,
                }));
            }
        }

        Ok(None)
    }

    /// Every fitting record of `days`, in day then log order
    fn collect_all(
        &self,
        request: &ReadRequest,
        days: &[NaiveDate],
        tally: &mut Tally,
    ) -> QueryResult<Vec<ShapeRecord>> {
        let mut days = days.to_vec();
        days.sort();

        let mut records = Vec::new();
        for day in days {
            let Some(index) = self.day_index(request, day, tally)? else {
                continue;
            };
            let log_path = log::path_for(&request.directory, &request.suffix, day);

            for entry in index.entries.iter().filter(|e| {
                request.matches_kind(&e.kind) && request.time_delta(e.data_time).is_some()
            }) {
                tally.entries_considered += 1;
                let Some(record) = self.materialize(&log_path, entry, tally)? else {
                    continue;
                };
                if record
                    .best_object(request.lead_seconds, request.lead_tolerance_seconds)
                    .is_some()
                {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    /// Read the record an entry points at, dropping it if it disagrees
    fn materialize(
        &self,
        log_path: &Path,
        entry: &IndexEntry,
        tally: &mut Tally,
    ) -> QueryResult<Option<ShapeRecord>> {
        tally.records_read += 1;

        let problem = match log::read_at(log_path, entry.byte_offset) {
            Ok((record, _)) if record.data_time == entry.data_time => return Ok(Some(record)),
            Ok((record, _)) => StoreError::Corruption(format!(
                "{} at byte {}: index says data time {}, record has {}",
                log_path.display(),
                entry.byte_offset,
                entry.data_time,
                record.data_time
            )),
            Err(e) if e.is_format() => StoreError::Corruption(format!(
                "{} at byte {}: {}",
                log_path.display(),
                entry.byte_offset,
                e
            )),
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                StoreError::Corruption(format!(
                    "{} at byte {}: offset is past end of log",
                    log_path.display(),
                    entry.byte_offset
                ))
            }
            Err(e) => return Err(e.into()),
        };

        tally.corrupt_skipped += 1;
        warn!(error = %problem, "dropping record");
        Ok(None)
    }
}
