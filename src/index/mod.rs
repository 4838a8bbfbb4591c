//! Derived per-day indexes over the shape logs
//!
//! An index lists, for every record in one day's log, the record's data
//! time, the lead time of its first object, its type and the byte offset of
//! its `NEW_PRODUCT` line. Queries consult the index and only read the
//! records that can match.
//!
//! # Architecture
//!
//! ```text
//! ensure_index(dir, suffix, day)
//!        ↓
//! stat log ── absent ──→ invalidate cache entry, IoError
//!        ↓
//! stat index ── missing ─────────────→ full rebuild
//!        │ ─── newer/equal ──────────→ cache hit or load from disk
//!        └──── older ─→ probe last entry
//!                          ├─ misaligned / log shrank → full rebuild
//!                          ├─ log grew → scan new bytes, extend, persist
//!                          └─ same length → touch index mtime
//! ```

mod cache;
mod index_file;
mod maintenance;

pub use cache::{CachedIndex, IndexCache};
pub use maintenance::{IndexMaintainer, MaintenanceStats, DEFAULT_MAX_SCAN_PASSES};

use crate::storage::vocab::ProductKind;
use crate::storage::ShapeRecord;
use serde::{Deserialize, Serialize};

/// Location and sort keys of one record in a log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub data_time: i64,
    /// Lead time of the record's first object
    pub lead_seconds: i64,
    /// Start of the record's marker line
    pub byte_offset: u64,
    pub kind: ProductKind,
}

impl IndexEntry {
    pub fn from_record(record: &ShapeRecord, byte_offset: u64) -> Self {
        Self {
            data_time: record.data_time,
            lead_seconds: record.first_lead(),
            byte_offset,
            kind: record.kind.clone(),
        }
    }
}

/// The index of one day's log
///
/// Entries are kept in log order. An `IndexFile` is never mutated once it
/// is shared; maintenance builds a new value and swaps it into the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexFile {
    /// Log length in bytes when the index was last brought up to date
    pub observed_log_length: u64,
    pub entries: Vec<IndexEntry>,
}

impl IndexFile {
    pub fn new(observed_log_length: u64, entries: Vec<IndexEntry>) -> Self {
        Self {
            observed_log_length,
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&IndexEntry> {
        self.entries.last()
    }
}
