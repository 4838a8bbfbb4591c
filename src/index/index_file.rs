//! On-disk text form of an index
//!
//! ```text
//! <observed log length>
//! <data_time> <lead_seconds> <byte_offset> <type>
//! ...
//! ```

use crate::index::{IndexEntry, IndexFile};
use crate::storage::calendar;
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::vocab::ProductKind;
use chrono::NaiveDate;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const INDEX_SUFFIX: &str = "_index";

impl IndexFile {
    /// Path of the index for `day`: `{directory}/{YYYYMMDD}.{suffix}_index`
    pub fn path_for(directory: &Path, suffix: &str, day: NaiveDate) -> PathBuf {
        directory.join(format!(
            "{}.{}{}",
            calendar::day_stamp(day),
            suffix,
            INDEX_SUFFIX
        ))
    }

    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> StoreResult<Self> {
        let mut lines = text.split_inclusive('\n');
        let mut position = 0u64;

        let header = lines
            .next()
            .ok_or_else(|| StoreError::format(0, "empty index"))?;
        let observed_log_length: u64 = header
            .trim()
            .parse()
            .map_err(|_| StoreError::format(0, format!("bad log length '{}'", header.trim())))?;
        position += header.len() as u64;

        let mut entries = Vec::new();
        for line in lines {
            let start = position;
            position += line.len() as u64;

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() != 4 {
                return Err(StoreError::format(
                    start,
                    format!("index entry needs 4 fields, found {}", fields.len()),
                ));
            }

            let bad = |what: &str| StoreError::format(start, format!("bad {} in index entry", what));
            entries.push(IndexEntry {
                data_time: fields[0].parse().map_err(|_| bad("data time"))?,
                lead_seconds: fields[1].parse().map_err(|_| bad("lead"))?,
                byte_offset: fields[2].parse().map_err(|_| bad("offset"))?,
                kind: ProductKind::parse(fields[3]),
            });
        }

        Ok(Self {
            observed_log_length,
            entries,
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(16 + self.entries.len() * 32);
        let _ = writeln!(out, "{}", self.observed_log_length);
        for entry in &self.entries {
            let _ = writeln!(
                out,
                "{} {} {} {}",
                entry.data_time, entry.lead_seconds, entry.byte_offset, entry.kind
            );
        }
        out
    }

    /// Write the index atomically and stamp its mtime
    ///
    /// The file is written beside its final path and renamed into place.
    /// Its mtime is set to `not_before` if the clock reads earlier, so a
    /// freshly written index never looks older than the log it describes.
    /// Returns the mtime the file ends up with.
    pub fn save(&self, path: &Path, not_before: SystemTime) -> StoreResult<SystemTime> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(self.render().as_bytes())?;
            file.sync_all()?;
        }

        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        touch(path, not_before)
    }
}

/// Set a file's mtime to now, or to `not_before` if that is later
pub(crate) fn touch(path: &Path, not_before: SystemTime) -> StoreResult<SystemTime> {
    let stamp = SystemTime::now().max(not_before);
    let file = File::options().write(true).open(path)?;
    file.set_modified(stamp)?;
    Ok(file.metadata()?.modified()?)
}
