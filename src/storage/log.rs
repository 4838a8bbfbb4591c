//! Per-day shape logs
//!
//! One append-only text file per UTC calendar day, named
//! `{directory}/{YYYYMMDD}.{suffix}`. Records are located by the byte
//! offset of their `NEW_PRODUCT` line.

use crate::storage::calendar;
use crate::storage::codec::{encode_record, RecordReader};
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::types::ShapeRecord;
use chrono::NaiveDate;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Take, Write};
use std::path::{Path, PathBuf};

/// Path of the log file for `day`
pub fn path_for(directory: &Path, suffix: &str, day: NaiveDate) -> PathBuf {
    directory.join(format!("{}.{}", calendar::day_stamp(day), suffix))
}

/// Append a record, returning the byte offset of its marker line
pub fn append(path: &Path, record: &ShapeRecord) -> StoreResult<u64> {
    record.validate().map_err(StoreError::InvalidRecord)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let offset = file.metadata()?.len();

    // one write per record keeps a concurrent reader from seeing half a header
    file.write_all(encode_record(record).as_bytes())?;
    file.flush()?;

    tracing::trace!(path = %path.display(), offset, "appended record");
    Ok(offset)
}

/// Parse the record whose marker starts at `byte_offset`
///
/// Returns the record and the offset just past it. A record cut short by
/// end of file is an `UnexpectedEof` I/O error here; only [`scan`] treats
/// it as a quiet stop.
pub fn read_at(path: &Path, byte_offset: u64) -> StoreResult<(ShapeRecord, u64)> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(byte_offset))?;

    let mut reader = RecordReader::new(BufReader::new(file), byte_offset);
    match reader.read_record() {
        Ok((record, _)) => Ok((record, reader.position())),
        Err(StoreError::Truncated { offset }) => Err(StoreError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{}: record at byte {} ends prematurely", path.display(), offset),
        ))),
        Err(e) => Err(e),
    }
}

/// Check that a complete record with `expected_data_time` starts at `byte_offset`
///
/// Returns the offset just past that record when it does, `None` when the
/// offset no longer lands on such a record. Only I/O failures other than
/// running off the end of the file are errors.
pub fn probe_alignment(
    path: &Path,
    byte_offset: u64,
    expected_data_time: i64,
) -> StoreResult<Option<u64>> {
    match read_at(path, byte_offset) {
        Ok((record, next)) if record.data_time == expected_data_time => Ok(Some(next)),
        Ok((record, _)) => {
            tracing::debug!(
                path = %path.display(),
                byte_offset,
                expected = expected_data_time,
                found = record.data_time,
                "record at offset has a different data time"
            );
            Ok(None)
        }
        Err(e) if e.is_format() => Ok(None),
        Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Lazily iterate the records of a log from `start_offset`
pub fn scan(path: &Path, start_offset: u64) -> StoreResult<LogScanner> {
    LogScanner::open(path, start_offset, None)
}

/// Like [`scan`], but never read at or past `end_offset`
///
/// A record straddling `end_offset` counts as a partial tail.
pub fn scan_to(path: &Path, start_offset: u64, end_offset: u64) -> StoreResult<LogScanner> {
    LogScanner::open(path, start_offset, Some(end_offset))
}

/// Iterator over `(record, record_start_offset)` pairs
///
/// A malformed record is yielded as an error and the scan resumes at the
/// next marker line. A record cut short by end of file ends the scan
/// quietly: it is most likely still being written.
pub struct LogScanner {
    reader: RecordReader<BufReader<Take<File>>>,
    resync: bool,
    finished: bool,
    malformed: u64,
    truncated_at: Option<u64>,
}

impl LogScanner {
    pub fn open(path: &Path, start_offset: u64, end_offset: Option<u64>) -> StoreResult<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(start_offset))?;
        let limit = end_offset.map_or(u64::MAX, |end| end.saturating_sub(start_offset));
        Ok(Self {
            reader: RecordReader::new(BufReader::new(file.take(limit)), start_offset),
            resync: false,
            finished: false,
            malformed: 0,
            truncated_at: None,
        })
    }

    /// Number of malformed records skipped so far
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Offset of an incomplete trailing record, if the scan stopped at one
    pub fn truncated_at(&self) -> Option<u64> {
        self.truncated_at
    }
}

impl Iterator for LogScanner {
    type Item = StoreResult<(ShapeRecord, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.reader.next_record(self.resync) {
            Ok(Some(found)) => {
                self.resync = false;
                Some(Ok(found))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(StoreError::Truncated { offset }) => {
                self.finished = true;
                self.truncated_at = Some(offset);
                None
            }
            Err(e) if e.is_format() => {
                self.resync = true;
                self.malformed += 1;
                Some(Err(e))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::PolylineObject;
    use crate::storage::vocab::{ProductKind, ProductSubKind};
    use tempfile::tempdir;

    fn record(data_time: i64) -> ShapeRecord {
        ShapeRecord::new(ProductKind::Boundary, ProductSubKind::Detection, data_time)
            .object(PolylineObject::new("b", 0).point(35.0, -97.0).point(35.2, -97.1))
    }

    #[test]
    fn test_path_for() {
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let path = path_for(Path::new("/data/shapes"), "bdry", day);
        assert_eq!(path, PathBuf::from("/data/shapes/20240601.bdry"));
    }

    #[test]
    fn test_append_and_read_at() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("20240601.bdry");

        let first = append(&path, &record(100)).unwrap();
        let second = append(&path, &record(200)).unwrap();
        assert_eq!(first, 0);
        assert!(second > first);

        let (found, next) = read_at(&path, second).unwrap();
        assert_eq!(found.data_time, 200);
        assert_eq!(next, std::fs::metadata(&path).unwrap().len());

        let (found, next) = read_at(&path, first).unwrap();
        assert_eq!(found.data_time, 100);
        assert_eq!(next, second);
    }

    #[test]
    fn test_read_at_misaligned_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("20240601.bdry");
        append(&path, &record(100)).unwrap();

        assert!(read_at(&path, 3).unwrap_err().is_format());

        let len = std::fs::metadata(&path).unwrap().len();
        assert!(matches!(read_at(&path, len), Err(StoreError::Io(_))));
    }

    #[test]
    fn test_read_at_half_written_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("20240601.bdry");
        append(&path, &record(0)).unwrap();
        let tail_start = std::fs::metadata(&path).unwrap().len();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"NEW_PRODUCT BOUNDARY DETECTION 1 0 0\nGEN_TI").unwrap();
        }

        match read_at(&path, tail_start) {
            Err(StoreError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected UnexpectedEof, got {:?}", other.map(|(r, _)| r.data_time)),
        }
        assert_eq!(probe_alignment(&path, tail_start, 1).unwrap(), None);
    }

    #[test]
    fn test_probe_alignment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("20240601.bdry");
        let first = append(&path, &record(100)).unwrap();
        let second = append(&path, &record(200)).unwrap();

        assert_eq!(probe_alignment(&path, first, 100).unwrap(), Some(second));
        assert_eq!(probe_alignment(&path, second, 100).unwrap(), None);
        assert_eq!(probe_alignment(&path, second + 1, 200).unwrap(), None);
        assert_eq!(probe_alignment(&path, 1 << 20, 200).unwrap(), None);

        let missing = dir.path().join("20240602.bdry");
        assert!(probe_alignment(&missing, 0, 0).unwrap_err().is_not_found());
    }

    #[test]
    fn test_append_rejects_invalid_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("20240601.bdry");
        let empty = ShapeRecord::new(ProductKind::Boundary, ProductSubKind::Detection, 0);

        assert!(matches!(append(&path, &empty), Err(StoreError::InvalidRecord(_))));
        assert!(!path.exists());

        // would otherwise be written with an epoch timestamp
        for time in [i64::MAX, i64::MIN] {
            let err = append(&path, &record(time)).unwrap_err();
            assert!(matches!(err, StoreError::InvalidRecord(_)), "{err}");
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_scan_from_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("20240601.bdry");
        let offsets: Vec<u64> = (0..5).map(|i| append(&path, &record(i * 60)).unwrap()).collect();

        let all: Vec<_> = scan(&path, 0).unwrap().collect::<StoreResult<_>>().unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all.iter().map(|(_, off)| *off).collect::<Vec<_>>(), offsets);

        let tail: Vec<_> = scan(&path, offsets[3]).unwrap().collect::<StoreResult<_>>().unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].0.data_time, 180);
    }

    #[test]
    fn test_scan_to_stops_at_end_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("20240601.bdry");
        let offsets: Vec<u64> = (0..4).map(|i| append(&path, &record(i * 60)).unwrap()).collect();

        let mut head = scan_to(&path, 0, offsets[2]).unwrap();
        let found: Vec<i64> = head
            .by_ref()
            .map(|item| item.unwrap().0.data_time)
            .collect();
        assert_eq!(found, vec![0, 60]);
        assert_eq!(head.truncated_at(), None);

        // an end inside a record leaves that record out
        let mut cut = scan_to(&path, offsets[1], offsets[3] - 5).unwrap();
        let found: Vec<i64> = cut.by_ref().map(|item| item.unwrap().0.data_time).collect();
        assert_eq!(found, vec![60]);
        assert_eq!(cut.truncated_at(), Some(offsets[2]));
    }

    #[test]
    fn test_scan_skips_malformed_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("20240601.bdry");
        append(&path, &record(0)).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"NEW_PRODUCT BOUNDARY DETECTION 1 0 0\nGEN_TIME oops\n\n")
                .unwrap();
        }
        append(&path, &record(120)).unwrap();

        let mut scanner = scan(&path, 0).unwrap();
        let items: Vec<_> = scanner.by_ref().collect();
        assert_eq!(items.len(), 3);
        assert!(items[1].is_err());
        assert_eq!(scanner.malformed(), 1);

        let good: Vec<i64> = items
            .into_iter()
            .filter_map(Result::ok)
            .map(|(r, _)| r.data_time)
            .collect();
        assert_eq!(good, vec![0, 120]);
    }

    #[test]
    fn test_scan_stops_at_partial_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("20240601.bdry");
        append(&path, &record(0)).unwrap();
        let tail_start = std::fs::metadata(&path).unwrap().len();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"NEW_PRODUCT BOUNDARY DETECTION 1 0 0\nGEN_TI").unwrap();
        }

        let mut scanner = scan(&path, 0).unwrap();
        let items: Vec<_> = scanner.by_ref().collect::<StoreResult<_>>().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(scanner.truncated_at(), Some(tail_start));
        assert_eq!(scanner.malformed(), 0);
    }
}
