//! Index Maintenance - keeps each day's index in step with its log
//!
//! Logs are append-only, so most of the time an out-of-date index only
//! needs the records written since it was built. Before trusting that, the
//! last indexed entry is probed: if its offset no longer lands on the same
//! record, the log was rewritten and the index is rebuilt from scratch.

use crate::index::cache::{CachedIndex, IndexCache};
use crate::index::index_file;
use crate::index::{IndexEntry, IndexFile};
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::log;
use chrono::NaiveDate;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Default bound on scan passes while a log keeps growing
pub const DEFAULT_MAX_SCAN_PASSES: u32 = 5;

/// Counters describing the work maintenance has done
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceStats {
    pub full_rebuilds: u64,
    pub extensions: u64,
    pub touches: u64,
    pub disk_loads: u64,
    pub cache_hits: u64,
    /// Records parsed by rebuild and extension scans
    pub records_scanned: u64,
}

#[derive(Debug, Default)]
struct Counters {
    full_rebuilds: AtomicU64,
    extensions: AtomicU64,
    touches: AtomicU64,
    disk_loads: AtomicU64,
    cache_hits: AtomicU64,
    records_scanned: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MaintenanceStats {
        MaintenanceStats {
            full_rebuilds: self.full_rebuilds.load(Ordering::Relaxed),
            extensions: self.extensions.load(Ordering::Relaxed),
            touches: self.touches.load(Ordering::Relaxed),
            disk_loads: self.disk_loads.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            records_scanned: self.records_scanned.load(Ordering::Relaxed),
        }
    }
}

/// Log state observed by a stat call
#[derive(Debug, Clone, Copy)]
struct LogState {
    len: u64,
    modified: SystemTime,
}

impl LogState {
    fn stat(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(Self {
            len: meta.len(),
            modified: meta.modified()?,
        })
    }
}

/// Entries found by a scan, with the log state it was stable at
struct ScanResult {
    entries: Vec<IndexEntry>,
    log: LogState,
}

/// Decides whether an index is fresh, extendable or must be rebuilt
pub struct IndexMaintainer {
    cache: Arc<IndexCache>,
    /// Where index files live; next to the logs when `None`
    index_dir: Option<PathBuf>,
    max_scan_passes: u32,
    counters: Counters,
    /// Runs between a scan pass and the stat that checks it
    #[cfg(test)]
    after_pass: Option<Box<dyn Fn(u32) + Send + Sync>>,
}

impl IndexMaintainer {
    pub fn new(cache: Arc<IndexCache>) -> Self {
        Self {
            cache,
            index_dir: None,
            max_scan_passes: DEFAULT_MAX_SCAN_PASSES,
            counters: Counters::default(),
            #[cfg(test)]
            after_pass: None,
        }
    }

    /// Builder: keep index files in a separate directory
    pub fn with_index_dir(mut self, index_dir: Option<PathBuf>) -> Self {
        self.index_dir = index_dir;
        self
    }

    /// Builder: bound the scan passes of a rebuild on a growing log
    pub fn with_max_scan_passes(mut self, passes: u32) -> Self {
        self.max_scan_passes = passes.max(1);
        self
    }

    pub fn cache(&self) -> &Arc<IndexCache> {
        &self.cache
    }

    pub fn stats(&self) -> MaintenanceStats {
        self.counters.snapshot()
    }

    /// Path of the index describing `day`'s log in `directory`
    pub fn index_path(&self, directory: &Path, suffix: &str, day: NaiveDate) -> PathBuf {
        let dir = self.index_dir.as_deref().unwrap_or(directory);
        IndexFile::path_for(dir, suffix, day)
    }

    /// Return an index that is consistent with the log for `day`
    ///
    /// Builds, extends, touches or loads the index as needed and installs
    /// the result in the cache. Fails with an I/O error if the log does not
    /// exist.
    pub fn ensure_index(
        &self,
        directory: &Path,
        suffix: &str,
        day: NaiveDate,
    ) -> StoreResult<Arc<IndexFile>> {
        let log_path = log::path_for(directory, suffix, day);
        let index_path = self.index_path(directory, suffix, day);

        let slot = self.cache.slot(&index_path);
        let mut guard = slot.lock();

        let log_state = match LogState::stat(&log_path) {
            Ok(state) => state,
            Err(e) => {
                *guard = None;
                drop(guard);
                self.cache.invalidate(&index_path);
                return Err(e.into());
            }
        };

        match self.refresh(&log_path, &index_path, guard.as_ref(), log_state) {
            Ok(fresh) => {
                let index = Arc::clone(&fresh.index);
                *guard = Some(fresh);
                Ok(index)
            }
            Err(e) => {
                *guard = None;
                Err(e)
            }
        }
    }

    fn refresh(
        &self,
        log_path: &Path,
        index_path: &Path,
        cached: Option<&CachedIndex>,
        log_state: LogState,
    ) -> StoreResult<CachedIndex> {
        let index_modified = match fs::metadata(index_path) {
            Ok(meta) => Some(meta.modified()?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        match index_modified {
            None => {
                debug!(index = %index_path.display(), "no index on disk");
                self.rebuild(log_path, index_path)
            }
            Some(modified) if modified >= log_state.modified => {
                match self.current(cached, index_path, modified)? {
                    Some(current) => Ok(current),
                    None => self.rebuild(log_path, index_path),
                }
            }
            Some(modified) => match self.current(cached, index_path, modified)? {
                Some(current) => self.maybe_append(log_path, index_path, current.index, log_state),
                None => self.rebuild(log_path, index_path),
            },
        }
    }

    /// The index as it stands on disk, from the cache when it is current
    ///
    /// `None` means the on-disk index could not be parsed.
    fn current(
        &self,
        cached: Option<&CachedIndex>,
        index_path: &Path,
        modified: SystemTime,
    ) -> StoreResult<Option<CachedIndex>> {
        if let Some(cached) = cached.filter(|c| c.modified == modified) {
            Counters::bump(&self.counters.cache_hits, 1);
            return Ok(Some(cached.clone()));
        }

        match IndexFile::load(index_path) {
            Ok(index) => {
                Counters::bump(&self.counters.disk_loads, 1);
                debug!(
                    index = %index_path.display(),
                    entries = index.len(),
                    "loaded index from disk"
                );
                Ok(Some(CachedIndex {
                    index: Arc::new(index),
                    modified,
                }))
            }
            Err(e) if e.is_format() => {
                warn!(index = %index_path.display(), error = %e, "unreadable index file");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Bring an index that is older than its log up to date
    fn maybe_append(
        &self,
        log_path: &Path,
        index_path: &Path,
        current: Arc<IndexFile>,
        log_state: LogState,
    ) -> StoreResult<CachedIndex> {
        if log_state.len < current.observed_log_length {
            info!(
                log = %log_path.display(),
                was = current.observed_log_length,
                now = log_state.len,
                "log shrank, rebuilding index"
            );
            return self.rebuild(log_path, index_path);
        }

        let Some(last) = current.last() else {
            debug!(log = %log_path.display(), "index has no entries to anchor an extension");
            return self.rebuild(log_path, index_path);
        };

        let Some(resume_at) = log::probe_alignment(log_path, last.byte_offset, last.data_time)?
        else {
            warn!(
                log = %log_path.display(),
                offset = last.byte_offset,
                "last index entry is misaligned, rebuilding index"
            );
            return self.rebuild(log_path, index_path);
        };

        if log_state.len == current.observed_log_length {
            let modified = index_file::touch(index_path, log_state.modified)?;
            Counters::bump(&self.counters.touches, 1);
            debug!(index = %index_path.display(), "log unchanged, touched index");
            return Ok(CachedIndex {
                index: current,
                modified,
            });
        }

        let scan = self.scan_until_stable(log_path, resume_at)?;
        let added = scan.entries.len();

        let mut entries = Vec::with_capacity(current.len() + added);
        entries.extend(current.entries.iter().cloned());
        entries.extend(scan.entries);
        let index = IndexFile::new(scan.log.len, entries);

        let modified = index.save(index_path, scan.log.modified)?;
        Counters::bump(&self.counters.extensions, 1);
        debug!(
            index = %index_path.display(),
            added,
            log_len = scan.log.len,
            "extended index"
        );

        Ok(CachedIndex {
            index: Arc::new(index),
            modified,
        })
    }

    /// Scan the whole log and replace the index
    fn rebuild(&self, log_path: &Path, index_path: &Path) -> StoreResult<CachedIndex> {
        let scan = self.scan_until_stable(log_path, 0)?;
        let index = IndexFile::new(scan.log.len, scan.entries);
        let modified = index.save(index_path, scan.log.modified)?;

        Counters::bump(&self.counters.full_rebuilds, 1);
        info!(
            log = %log_path.display(),
            entries = index.len(),
            log_len = index.observed_log_length,
            "rebuilt index"
        );

        Ok(CachedIndex {
            index: Arc::new(index),
            modified,
        })
    }

    /// Scan from `start` to end of log, rescanning while the log grows
    ///
    /// Each pass reads no further than the length stat'ed before it, so a
    /// writer that never pauses costs at most `max_scan_passes` bounded
    /// passes.
    fn scan_until_stable(&self, log_path: &Path, start: u64) -> StoreResult<ScanResult> {
        for pass in 1..=self.max_scan_passes {
            let before = LogState::stat(log_path)?;

            let mut entries = Vec::new();
            for item in log::scan_to(log_path, start, before.len)? {
                match item {
                    Ok((record, offset)) => entries.push(IndexEntry::from_record(&record, offset)),
                    Err(e) if e.is_format() => {
                        warn!(log = %log_path.display(), error = %e, "skipping malformed record");
                    }
                    Err(e) => return Err(e),
                }
            }
            Counters::bump(&self.counters.records_scanned, entries.len() as u64);

            #[cfg(test)]
            if let Some(hook) = &self.after_pass {
                hook(pass);
            }

            let after = LogState::stat(log_path)?;
            if after.len == before.len {
                return Ok(ScanResult {
                    entries,
                    log: after,
                });
            }

            debug!(
                log = %log_path.display(),
                pass,
                before = before.len,
                after = after.len,
                "log changed during scan"
            );
        }

        Err(StoreError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!(
                "{}: file appears to be growing without bound",
                log_path.display()
            ),
        )))
    }
}
