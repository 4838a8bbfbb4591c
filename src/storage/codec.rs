//! Line-oriented text framing for shape records
//!
//! Layout per record:
//! ```text
//! NEW_PRODUCT <type> <sub_type> <n_objects> <group_id> <seq_num>
//! GEN_TIME Y M D h m s
//! TIMES Y M D h m s  Y M D h m s  Y M D h m s      (data, valid, expire)
//! DESCRIPTION <free text>                          (optional)
//! MOTION <direction> <speed>
//! DETECTION <line_type> <quality> <threshold>      (optional)
//! OBJECT <label> <n_points> <lead_seconds>         (per object)
//! <lat> <lon> [<u> <v>]                            (n_points lines)
//! VALUES <v1> <v2> ...                             (optional, per object)
//! <blank line>
//! ```
//!
//! Offsets reported by [`RecordReader`] are byte positions in the
//! underlying file, so the start of a `NEW_PRODUCT` line can be stored in
//! an index and handed back to [`crate::storage::log::read_at`].

use crate::storage::calendar;
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::types::{Detection, LatLon, MotionVector, PolylineObject, ShapeRecord};
use crate::storage::vocab::{LineType, ProductKind, ProductSubKind};
use std::fmt::Write as _;
use std::io::{self, BufRead};

/// First token of every record
pub const PRODUCT_MARKER: &str = "NEW_PRODUCT";

const GEN_TIME: &str = "GEN_TIME";
const TIMES: &str = "TIMES";
const DESCRIPTION: &str = "DESCRIPTION";
const MOTION: &str = "MOTION";
const DETECTION: &str = "DETECTION";
const OBJECT: &str = "OBJECT";
const VALUES: &str = "VALUES";

/// Counts in a header are untrusted until the lines are actually read
const MAX_PREALLOC: usize = 1024;

/// Whether a line starts a record
pub fn is_marker_line(line: &str) -> bool {
    first_token(line) == Some(PRODUCT_MARKER)
}

fn first_token(line: &str) -> Option<&str> {
    line.split_whitespace().next()
}

/// Newlines would break the framing; fold them into spaces
fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

fn push_time(out: &mut String, timestamp: i64) {
    for field in calendar::to_fields(timestamp) {
        let _ = write!(out, " {}", field);
    }
}

/// Serialize one record, including its trailing blank line
pub fn encode_record(record: &ShapeRecord) -> String {
    let mut out = String::with_capacity(256);

    let _ = writeln!(
        out,
        "{} {} {} {} {} {}",
        PRODUCT_MARKER,
        record.kind,
        record.sub_kind,
        record.objects.len(),
        record.group_id,
        record.sequence_number
    );

    out.push_str(GEN_TIME);
    push_time(&mut out, record.gen_time);
    out.push('\n');

    out.push_str(TIMES);
    push_time(&mut out, record.data_time);
    push_time(&mut out, record.valid_time);
    push_time(&mut out, record.expire_time);
    out.push('\n');

    let description = single_line(&record.description);
    if !description.trim().is_empty() {
        let _ = writeln!(out, "{} {}", DESCRIPTION, description.trim());
    }

    let _ = writeln!(out, "{} {} {}", MOTION, record.motion_dir, record.motion_speed);

    if let Some(detection) = &record.detection {
        let _ = writeln!(
            out,
            "{} {} {} {}",
            DETECTION, detection.line_type, detection.quality_value, detection.quality_threshold
        );
    }

    for object in &record.objects {
        let _ = writeln!(
            out,
            "{} {} {} {}",
            OBJECT,
            single_line(&object.label).trim(),
            object.points.len(),
            object.lead_seconds
        );

        for (idx, point) in object.points.iter().enumerate() {
            match object.motion.as_ref().and_then(|m| m.get(idx)) {
                Some(mv) => {
                    let _ = writeln!(out, "{} {} {} {}", point.lat, point.lon, mv.u, mv.v);
                }
                None => {
                    let _ = writeln!(out, "{} {}", point.lat, point.lon);
                }
            }
        }

        if let Some(values) = &object.values {
            out.push_str(VALUES);
            for value in values {
                let _ = write!(out, " {}", value);
            }
            out.push('\n');
        }
    }

    out.push('\n');
    out
}

/// A line read from the log, with the byte offset it starts at
#[derive(Debug)]
struct Line {
    text: String,
    start: u64,
    /// False for a final line without its newline (still being written)
    complete: bool,
}

impl Line {
    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    fn keyword(&self) -> Option<&str> {
        first_token(&self.text)
    }

    /// Tokens after the leading keyword
    fn fields(&self) -> Vec<&str> {
        self.text.split_whitespace().skip(1).collect()
    }
}

/// Reads records from a byte stream positioned at `start_offset`
pub struct RecordReader<R> {
    reader: R,
    offset: u64,
    pending: Option<Line>,
    buf: Vec<u8>,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(reader: R, start_offset: u64) -> Self {
        Self {
            reader,
            offset: start_offset,
            pending: None,
            buf: Vec::with_capacity(128),
        }
    }

    /// Byte offset of the next unread line
    pub fn position(&self) -> u64 {
        self.pending.as_ref().map(|l| l.start).unwrap_or(self.offset)
    }

    fn next_line(&mut self) -> io::Result<Option<Line>> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }

        self.buf.clear();
        let read = self.reader.read_until(b'\n', &mut self.buf)?;
        if read == 0 {
            return Ok(None);
        }

        let start = self.offset;
        self.offset += read as u64;
        let complete = self.buf.last() == Some(&b'\n');
        let text = String::from_utf8_lossy(&self.buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        Ok(Some(Line {
            text,
            start,
            complete,
        }))
    }

    fn push_back(&mut self, line: Line) {
        self.pending = Some(line);
    }

    /// Parse the record that starts exactly at the current position
    ///
    /// Fails with an `UnexpectedEof` I/O error when nothing is left to read.
    pub fn read_record(&mut self) -> StoreResult<(ShapeRecord, u64)> {
        let line = self.next_line()?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("no record at byte {}", self.offset),
            )
        })?;

        if !line.complete {
            return Err(StoreError::Truncated { offset: line.start });
        }
        if !is_marker_line(&line.text) {
            return Err(StoreError::format(
                line.start,
                format!("expected {} marker", PRODUCT_MARKER),
            ));
        }

        let start = line.start;
        let record = self.parse_body(line)?;
        Ok((record, start))
    }

    /// Find and parse the next record, skipping blank lines
    ///
    /// With `skip_garbage` set, non-marker lines are skipped as well; this
    /// is how a scan resynchronizes after a malformed record.
    pub fn next_record(&mut self, skip_garbage: bool) -> StoreResult<Option<(ShapeRecord, u64)>> {
        loop {
            let Some(line) = self.next_line()? else {
                return Ok(None);
            };

            if line.is_blank() {
                continue;
            }

            if !line.complete {
                return Err(StoreError::Truncated { offset: line.start });
            }

            if is_marker_line(&line.text) {
                let start = line.start;
                let record = self.parse_body(line)?;
                return Ok(Some((record, start)));
            }

            if !skip_garbage {
                return Err(StoreError::format(
                    line.start,
                    format!("expected {} marker", PRODUCT_MARKER),
                ));
            }
        }
    }

    /// Next line of the record body; a marker here means the record was cut short
    fn body_line(&mut self, record_start: u64) -> StoreResult<Line> {
        let line = self
            .next_line()?
            .filter(|line| line.complete)
            .ok_or(StoreError::Truncated { offset: record_start })?;

        if is_marker_line(&line.text) {
            let start = line.start;
            self.push_back(line);
            return Err(StoreError::format(
                start,
                format!("record at byte {} interrupted by a new product", record_start),
            ));
        }

        Ok(line)
    }

    fn keyword_line(&mut self, record_start: u64, keyword: &str) -> StoreResult<Line> {
        let line = self.body_line(record_start)?;
        if line.keyword() != Some(keyword) {
            return Err(StoreError::format(
                line.start,
                format!("expected {} line, found '{}'", keyword, line.text),
            ));
        }
        Ok(line)
    }

    fn parse_body(&mut self, header: Line) -> StoreResult<ShapeRecord> {
        let start = header.start;

        let fields = header.fields();
        if fields.len() != 5 {
            return Err(StoreError::format(
                start,
                format!("header needs 5 fields, found {}", fields.len()),
            ));
        }
        let kind = ProductKind::parse(fields[0]);
        let sub_kind = ProductSubKind::parse(fields[1]);
        let n_objects: usize = parse_field(fields[2], start, "object count")?;
        let group_id: i64 = parse_field(fields[3], start, "group id")?;
        let sequence_number: i64 = parse_field(fields[4], start, "sequence number")?;
        if n_objects == 0 {
            return Err(StoreError::format(start, "record declares no objects"));
        }

        let line = self.keyword_line(start, GEN_TIME)?;
        let gen_time = parse_times::<1>(&line)?[0];

        let line = self.keyword_line(start, TIMES)?;
        let [data_time, valid_time, expire_time] = parse_times::<3>(&line)?;

        let mut line = self.body_line(start)?;
        let mut description = String::new();
        if line.keyword() == Some(DESCRIPTION) {
            description = line.text.trim_start()[DESCRIPTION.len()..].trim().to_string();
            line = self.body_line(start)?;
        }

        if line.keyword() != Some(MOTION) {
            return Err(StoreError::format(
                line.start,
                format!("expected {} line, found '{}'", MOTION, line.text),
            ));
        }
        let fields = line.fields();
        if fields.len() != 2 {
            return Err(StoreError::format(line.start, "motion line needs 2 fields"));
        }
        let motion_dir: f64 = parse_field(fields[0], line.start, "motion direction")?;
        let motion_speed: f64 = parse_field(fields[1], line.start, "motion speed")?;

        let mut line = self.body_line(start)?;
        let mut detection = None;
        if line.keyword() == Some(DETECTION) {
            let fields = line.fields();
            if fields.len() != 3 {
                return Err(StoreError::format(line.start, "detection line needs 3 fields"));
            }
            detection = Some(Detection {
                line_type: LineType::parse(fields[0]),
                quality_value: parse_field(fields[1], line.start, "quality value")?,
                quality_threshold: parse_field(fields[2], line.start, "quality threshold")?,
            });
            line = self.body_line(start)?;
        }

        let mut objects = Vec::with_capacity(n_objects.min(MAX_PREALLOC));
        let mut next_header = Some(line);
        for _ in 0..n_objects {
            let header = match next_header.take() {
                Some(header) => header,
                None => self.body_line(start)?,
            };
            objects.push(self.parse_object(start, header)?);
        }

        self.finish_record(start)?;

        Ok(ShapeRecord {
            kind,
            sub_kind,
            group_id,
            sequence_number,
            data_time,
            valid_time,
            expire_time,
            gen_time,
            description,
            motion_dir,
            motion_speed,
            detection,
            objects,
        })
    }

    fn parse_object(&mut self, record_start: u64, header: Line) -> StoreResult<PolylineObject> {
        if header.keyword() != Some(OBJECT) {
            return Err(StoreError::format(
                header.start,
                format!("expected {} line, found '{}'", OBJECT, header.text),
            ));
        }

        // label may contain spaces, so the numeric fields are taken from the right
        let rest = header.text.trim_start()[OBJECT.len()..].trim();
        let (rest, lead) = rest
            .rsplit_once(char::is_whitespace)
            .ok_or_else(|| StoreError::format(header.start, "object line needs 3 fields"))?;
        let (label, n_points) = match rest.trim_end().rsplit_once(char::is_whitespace) {
            Some((label, n_points)) => (label.trim(), n_points),
            None => ("", rest.trim_end()),
        };
        let n_points: usize = parse_field(n_points, header.start, "point count")?;
        let lead_seconds: i64 = parse_field(lead, header.start, "lead seconds")?;

        let mut object = PolylineObject::new(label, lead_seconds);
        object.points.reserve(n_points.min(MAX_PREALLOC));
        let mut motion: Option<Vec<MotionVector>> = Some(Vec::new());

        for _ in 0..n_points {
            let line = self.body_line(record_start)?;
            let tokens: Vec<&str> = line.text.split_whitespace().collect();
            if tokens.len() != 2 && tokens.len() != 4 {
                return Err(StoreError::format(
                    line.start,
                    format!("point line needs 2 or 4 fields, found {}", tokens.len()),
                ));
            }

            let lat: f64 = parse_field(tokens[0], line.start, "latitude")?;
            let lon: f64 = parse_field(tokens[1], line.start, "longitude")?;
            if tokens.len() == 4 {
                let u: f64 = parse_field(tokens[2], line.start, "u component")?;
                let v: f64 = parse_field(tokens[3], line.start, "v component")?;
                if let Some(vectors) = motion.as_mut() {
                    vectors.push(MotionVector::sanitized(u, v));
                }
            } else {
                motion = None;
            }
            object.points.push(LatLon { lat, lon });
        }

        if n_points > 0 {
            object.motion = motion;
        }

        match self.next_line()? {
            Some(line) if !line.complete => {
                return Err(StoreError::Truncated {
                    offset: record_start,
                })
            }
            Some(line) if line.keyword() == Some(VALUES) => {
                let values = line
                    .fields()
                    .into_iter()
                    .map(|token| parse_field::<f64>(token, line.start, "value"))
                    .collect::<StoreResult<Vec<_>>>()?;
                if values.len() != n_points {
                    return Err(StoreError::format(
                        line.start,
                        format!("{} values for {} points", values.len(), n_points),
                    ));
                }
                object.values = Some(values);
            }
            Some(line) => self.push_back(line),
            None => {}
        }

        Ok(object)
    }

    /// Consume the blank terminator
    ///
    /// End of file or a following marker are accepted as terminators too.
    fn finish_record(&mut self, record_start: u64) -> StoreResult<()> {
        match self.next_line()? {
            None => Ok(()),
            Some(line) if line.is_blank() => Ok(()),
            Some(line) if !line.complete || is_marker_line(&line.text) => {
                self.push_back(line);
                Ok(())
            }
            Some(line) => Err(StoreError::format(
                line.start,
                format!(
                    "record at byte {} has trailing line '{}'",
                    record_start, line.text
                ),
            )),
        }
    }
}

fn parse_field<T: std::str::FromStr>(token: &str, offset: u64, what: &str) -> StoreResult<T> {
    token
        .parse()
        .map_err(|_| StoreError::format(offset, format!("unreadable {}: '{}'", what, token)))
}

fn parse_times<const N: usize>(line: &Line) -> StoreResult<[i64; N]> {
    let fields = line.fields();
    if fields.len() != N * 6 {
        return Err(StoreError::format(
            line.start,
            format!("{} needs {} fields, found {}", line.text, N * 6, fields.len()),
        ));
    }

    let mut times = [0i64; N];
    for (slot, chunk) in times.iter_mut().zip(fields.chunks(6)) {
        let year: i32 = parse_field(chunk[0], line.start, "year")?;
        let mut rest = [0u32; 5];
        for (value, token) in rest.iter_mut().zip(&chunk[1..]) {
            *value = parse_field(token, line.start, "time field")?;
        }
        *slot = calendar::from_fields(year, rest[0], rest[1], rest[2], rest[3], rest[4])
            .ok_or_else(|| StoreError::format(line.start, "invalid date or time"))?;
    }
    Ok(times)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{Detection, PolylineObject};
    use std::io::Cursor;

    fn sample() -> ShapeRecord {
        ShapeRecord::new(ProductKind::GustFront, ProductSubKind::Extrapolation, 1_717_200_300)
            .ids(12, 4)
            .generated_at(1_717_200_360)
            .valid_until(1_717_200_300, 1_717_203_900)
            .description("outflow from KFTG cell")
            .motion(225.0, 7.5)
            .detection(Detection::new(LineType::GustFront, 0.82, 0.5))
            .object(
                PolylineObject::new("gust front", 0)
                    .point_with_motion(39.75, -104.9, 3.5, -2.25)
                    .point_with_motion(39.8, -104.85, 3.0, -2.0)
                    .values(vec![12.0, 14.5]),
            )
            .object(PolylineObject::new("t+30", 1800).point(39.9, -104.7))
    }

    #[test]
    fn test_encode_layout() {
        let text = encode_record(&sample());
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "NEW_PRODUCT GUST_FRONT EXTRAPOLATION 2 12 4");
        assert_eq!(lines[1], "GEN_TIME 2024 6 1 0 6 0");
        assert_eq!(lines[2], "TIMES 2024 6 1 0 5 0 2024 6 1 0 5 0 2024 6 1 1 5 0");
        assert_eq!(lines[3], "DESCRIPTION outflow from KFTG cell");
        assert_eq!(lines[4], "MOTION 225 7.5");
        assert_eq!(lines[5], "DETECTION GUST_FRONT 0.82 0.5");
        assert_eq!(lines[6], "OBJECT gust front 2 0");
        assert_eq!(lines[7], "39.75 -104.9 3.5 -2.25");
        assert_eq!(lines[9], "VALUES 12 14.5");
        assert_eq!(lines[10], "OBJECT t+30 1 1800");
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_decode_encoded_record() {
        let record = sample();
        let text = encode_record(&record);
        let mut reader = RecordReader::new(Cursor::new(text.as_bytes()), 0);

        let (decoded, start) = reader.read_record().unwrap();
        assert_eq!(start, 0);
        assert_eq!(decoded, record);
        assert_eq!(reader.position(), text.len() as u64);
    }

    #[test]
    fn test_optional_lines_absent() {
        let record = ShapeRecord::new(ProductKind::Boundary, ProductSubKind::Detection, 0)
            .object(PolylineObject::new("", 0).point(1.0, 2.0));
        let text = encode_record(&record);
        assert!(!text.contains(DESCRIPTION));
        assert!(!text.contains(DETECTION));

        let mut reader = RecordReader::new(Cursor::new(text.as_bytes()), 0);
        let (decoded, _) = reader.read_record().unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_partial_motion_drops_uv() {
        let text = "NEW_PRODUCT BOUNDARY DETECTION 1 0 0\n\
                    GEN_TIME 2024 6 1 0 0 0\n\
                    TIMES 2024 6 1 0 0 0 2024 6 1 0 0 0 2024 6 1 0 0 0\n\
                    MOTION 0 0\n\
                    OBJECT a 2 0\n\
                    40 -105 1 1\n\
                    41 -104\n\n";
        let mut reader = RecordReader::new(Cursor::new(text.as_bytes()), 0);
        let (record, _) = reader.read_record().unwrap();
        assert_eq!(record.objects[0].points.len(), 2);
        assert!(record.objects[0].motion.is_none());
    }

    #[test]
    fn test_bad_point_field_count() {
        let text = "NEW_PRODUCT BOUNDARY DETECTION 1 0 0\n\
                    GEN_TIME 2024 6 1 0 0 0\n\
                    TIMES 2024 6 1 0 0 0 2024 6 1 0 0 0 2024 6 1 0 0 0\n\
                    MOTION 0 0\n\
                    OBJECT a 1 0\n\
                    40 -105 1\n\n";
        let mut reader = RecordReader::new(Cursor::new(text.as_bytes()), 0);
        let err = reader.read_record().unwrap_err();
        assert!(matches!(err, StoreError::Format { .. }), "{err}");
    }

    #[test]
    fn test_truncated_record() {
        let text = encode_record(&sample());
        let cut = &text[..text.len() / 2];
        let mut reader = RecordReader::new(Cursor::new(cut.as_bytes()), 100);
        let err = reader.read_record().unwrap_err();
        assert!(matches!(err, StoreError::Truncated { offset: 100 }), "{err}");
    }

    #[test]
    fn test_read_record_requires_marker() {
        let text = format!("\n{}", encode_record(&sample()));
        let mut reader = RecordReader::new(Cursor::new(text.as_bytes()), 0);
        assert!(reader.read_record().unwrap_err().is_format());
    }

    #[test]
    fn test_next_record_resyncs() {
        let good = encode_record(&sample());
        let text = format!("garbage line\n{}", good);
        let mut reader = RecordReader::new(Cursor::new(text.as_bytes()), 0);

        assert!(reader.next_record(false).is_err());
        let (record, start) = reader.next_record(true).unwrap().unwrap();
        assert_eq!(start, "garbage line\n".len() as u64);
        assert_eq!(record.group_id, 12);
        assert!(reader.next_record(true).unwrap().is_none());
    }

    #[test]
    fn test_interrupted_record_leaves_marker() {
        let good = encode_record(&sample());
        let cut: String = good.lines().take(5).map(|l| format!("{l}\n")).collect();
        let text = format!("{}{}", cut, good);
        let mut reader = RecordReader::new(Cursor::new(text.as_bytes()), 0);

        assert!(reader.next_record(true).unwrap_err().is_format());
        let (_, start) = reader.next_record(true).unwrap().unwrap();
        assert_eq!(start, cut.len() as u64);
    }
}
