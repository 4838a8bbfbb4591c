//! In-memory registry of validated indexes
//!
//! One slot per index path, each behind its own lock, so maintenance of
//! one day's index never blocks queries against another.

use crate::index::IndexFile;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// A validated index together with the on-disk mtime it was validated at
#[derive(Debug, Clone)]
pub struct CachedIndex {
    pub index: Arc<IndexFile>,
    pub modified: SystemTime,
}

pub type IndexSlot = Arc<Mutex<Option<CachedIndex>>>;

#[derive(Debug, Default)]
pub struct IndexCache {
    slots: Mutex<HashMap<PathBuf, IndexSlot>>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot for `path`, created empty on first use
    pub fn slot(&self, path: &Path) -> IndexSlot {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(path.to_path_buf()).or_default())
    }

    /// Cached index for `path`, if any
    pub fn get(&self, path: &Path) -> Option<CachedIndex> {
        let slot = self.slots.lock().get(path).cloned()?;
        let cached = slot.lock().clone();
        cached
    }

    /// Forget the index for `path`
    pub fn invalidate(&self, path: &Path) {
        if let Some(slot) = self.slots.lock().remove(path) {
            *slot.lock() = None;
        }
    }

    pub fn clear(&self) {
        let drained: Vec<IndexSlot> = self.slots.lock().drain().map(|(_, slot)| slot).collect();
        for slot in drained {
            *slot.lock() = None;
        }
    }

    /// Number of paths holding an index
    pub fn len(&self) -> usize {
        let slots: Vec<IndexSlot> = self.slots.lock().values().cloned().collect();
        slots.iter().filter(|slot| slot.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
