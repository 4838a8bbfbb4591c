//! Shape Store
//!
//! The store ties the pieces together for one log series:
//! - Write path: ShapeRecord → encode → append to the day's log
//! - Read path: ReadRequest → ensure_index per day → read_at → ShapeRecord
//!
//! All I/O is synchronous. Index state is shared through an
//! [`IndexCache`] handle, so several stores (or threads) over the same
//! directory can reuse each other's validated indexes.

use crate::index::{IndexCache, IndexFile, IndexMaintainer, MaintenanceStats};
use crate::query::{QueryEngine, QueryOutcome, QueryResult, ReadMode, ReadRequest};
use crate::storage::calendar;
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::log::{self, LogScanner};
use crate::storage::types::ShapeRecord;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Configuration for a shape store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the per-day logs
    pub data_dir: PathBuf,
    /// Directory for index files (default: next to the logs)
    pub index_dir: Option<PathBuf>,
    /// File name suffix of this log series
    pub suffix: String,
    /// Scan passes allowed while a log keeps growing (default: 5)
    pub max_scan_passes: u32,
    /// Hours after midnight in which empty queries also search the
    /// previous day (default: 3)
    pub midnight_fallback_hours: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("shapelog_data"),
            index_dir: None,
            suffix: "shapes".to_string(),
            max_scan_passes: crate::index::DEFAULT_MAX_SCAN_PASSES,
            midnight_fallback_hours: crate::query::DEFAULT_MIDNIGHT_FALLBACK_HOURS,
        }
    }
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Builder: set the log suffix
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Builder: keep indexes in their own directory
    pub fn index_dir(mut self, index_dir: impl Into<PathBuf>) -> Self {
        self.index_dir = Some(index_dir.into());
        self
    }

    /// Path of the log for `day`
    pub fn log_path(&self, day: NaiveDate) -> PathBuf {
        log::path_for(&self.data_dir, &self.suffix, day)
    }

    /// Path of the index for `day`
    pub fn index_path(&self, day: NaiveDate) -> PathBuf {
        let dir = self.index_dir.as_deref().unwrap_or(&self.data_dir);
        IndexFile::path_for(dir, &self.suffix, day)
    }

    fn validate(&self) -> StoreResult<()> {
        if self.suffix.is_empty() || self.suffix.contains(['/', '\\']) {
            return Err(StoreError::Config(format!(
                "suffix '{}' is not a plain file extension",
                self.suffix
            )));
        }
        if self.max_scan_passes == 0 {
            return Err(StoreError::Config(
                "max_scan_passes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// One series of per-day shape logs with their indexes
pub struct ShapeStore {
    config: StoreConfig,
    maintainer: Arc<IndexMaintainer>,
    engine: QueryEngine,
}

impl ShapeStore {
    /// Open a store with its own index cache
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        Self::with_cache(config, Arc::new(IndexCache::new()))
    }

    /// Open a store sharing an existing index cache
    pub fn with_cache(config: StoreConfig, cache: Arc<IndexCache>) -> StoreResult<Self> {
        config.validate()?;

        std::fs::create_dir_all(&config.data_dir)?;
        if let Some(index_dir) = &config.index_dir {
            std::fs::create_dir_all(index_dir)?;
        }

        let maintainer = Arc::new(
            IndexMaintainer::new(cache)
                .with_index_dir(config.index_dir.clone())
                .with_max_scan_passes(config.max_scan_passes),
        );
        let engine = QueryEngine::new(Arc::clone(&maintainer))
            .with_midnight_fallback_hours(config.midnight_fallback_hours);

        tracing::debug!(
            data_dir = %config.data_dir.display(),
            suffix = %config.suffix,
            "opened shape store"
        );

        Ok(Self {
            config,
            maintainer,
            engine,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Append a record to the log of its data time's day
    ///
    /// Returns the byte offset the record starts at.
    pub fn append(&self, record: &ShapeRecord) -> StoreResult<u64> {
        self.append_to_day(calendar::utc_day(record.data_time), record)
    }

    /// Append a record to the log of an explicit day
    pub fn append_to_day(&self, day: NaiveDate, record: &ShapeRecord) -> StoreResult<u64> {
        log::append(&self.config.log_path(day), record)
    }

    /// Bring the index for `day` up to date
    pub fn ensure_index(&self, day: NaiveDate) -> StoreResult<Arc<IndexFile>> {
        self.maintainer
            .ensure_index(&self.config.data_dir, &self.config.suffix, day)
    }

    /// Read the record at `byte_offset` of `day`'s log
    pub fn read_at(&self, day: NaiveDate, byte_offset: u64) -> StoreResult<(ShapeRecord, u64)> {
        log::read_at(&self.config.log_path(day), byte_offset)
    }

    /// Iterate every record of `day`'s log
    pub fn scan_day(&self, day: NaiveDate) -> StoreResult<LogScanner> {
        log::scan(&self.config.log_path(day), 0)
    }

    /// A request against this store's directory and suffix
    pub fn request(&self, mode: ReadMode, target_time: i64) -> ReadRequest {
        ReadRequest::new(
            mode,
            target_time,
            self.config.data_dir.clone(),
            self.config.suffix.clone(),
        )
    }

    pub fn query(&self, request: &ReadRequest) -> QueryResult<Vec<ShapeRecord>> {
        self.engine.query(request)
    }

    /// Query returning execution statistics along with the records
    pub fn query_detailed(&self, request: &ReadRequest) -> QueryResult<QueryOutcome> {
        self.engine.execute(request)
    }

    /// Days that have a log in this series, oldest first
    pub fn days(&self) -> StoreResult<Vec<NaiveDate>> {
        let wanted = format!(".{}", self.config.suffix);
        let mut days = Vec::new();

        for entry in std::fs::read_dir(&self.config.data_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(day) = name
                .strip_suffix(&wanted)
                .and_then(calendar::parse_day_stamp)
            {
                days.push(day);
            }
        }

        days.sort();
        Ok(days)
    }

    pub fn maintenance_stats(&self) -> MaintenanceStats {
        self.maintainer.stats()
    }

    /// Get store statistics
    pub fn stats(&self) -> StoreResult<StoreStats> {
        let days = self.days()?;
        let log_bytes = days
            .iter()
            .filter_map(|day| std::fs::metadata(self.config.log_path(*day)).ok())
            .map(|m| m.len())
            .sum();

        Ok(StoreStats {
            day_count: days.len(),
            log_bytes,
            cached_indexes: self.maintainer.cache().len(),
            maintenance: self.maintainer.stats(),
        })
    }
}

/// Store statistics
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub day_count: usize,
    pub log_bytes: u64,
    pub cached_indexes: usize,
    pub maintenance: MaintenanceStats,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Days: {}, Logs: {:.2} MB, Cached indexes: {}, Rebuilds: {}, Extensions: {}",
            self.day_count,
            self.log_bytes as f64 / (1024.0 * 1024.0),
            self.cached_indexes,
            self.maintenance.full_rebuilds,
            self.maintenance.extensions
        )
    }
}
