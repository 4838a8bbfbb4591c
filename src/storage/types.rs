//! Core data types for the shape store
//!
//! This module defines the records kept in the per-day logs:
//! - `ShapeRecord`: one detected or forecast product
//! - `PolylineObject`: one polyline of a product, observed or extrapolated
//! - `Detection`: optional detection attributes of a product
//!
//! All times are Unix seconds (UTC).

use crate::storage::calendar;
use crate::storage::vocab::{LineType, ProductKind, ProductSubKind};
use serde::{Deserialize, Serialize};

/// Sentinel stored in place of an unusable motion component
pub const MISSING_VALUE: f64 = -9999.0;

/// Largest plausible motion component magnitude (m/s)
pub const MAX_MOTION_COMPONENT: f64 = 500.0;

/// A polyline vertex
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

/// Motion vector components at a vertex
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MotionVector {
    pub u: f64,
    pub v: f64,
}

impl MotionVector {
    /// Build a vector, replacing implausible components with `MISSING_VALUE`
    pub fn sanitized(u: f64, v: f64) -> Self {
        Self {
            u: sanitize_component(u),
            v: sanitize_component(v),
        }
    }

    pub fn is_missing(&self) -> bool {
        self.u == MISSING_VALUE || self.v == MISSING_VALUE
    }
}

fn sanitize_component(value: f64) -> f64 {
    if value.is_finite() && value.abs() <= MAX_MOTION_COMPONENT {
        value
    } else {
        MISSING_VALUE
    }
}

/// One polyline of a shape record
///
/// `motion` and `values`, when present, have one element per point.
/// `motion` is only present if every point carried a motion vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolylineObject {
    /// Short label
    pub label: String,
    /// Offset from the record's data time this copy represents
    pub lead_seconds: i64,
    pub points: Vec<LatLon>,
    #[serde(default)]
    pub motion: Option<Vec<MotionVector>>,
    #[serde(default)]
    pub values: Option<Vec<f64>>,
}

impl PolylineObject {
    pub fn new(label: impl Into<String>, lead_seconds: i64) -> Self {
        Self {
            label: label.into(),
            lead_seconds,
            points: Vec::new(),
            motion: None,
            values: None,
        }
    }

    /// Builder: add a vertex without motion (drops any motion collected so far)
    pub fn point(mut self, lat: f64, lon: f64) -> Self {
        self.push_point(lat, lon, None);
        self
    }

    /// Builder: add a vertex with motion components
    pub fn point_with_motion(mut self, lat: f64, lon: f64, u: f64, v: f64) -> Self {
        self.push_point(lat, lon, Some(MotionVector::sanitized(u, v)));
        self
    }

    /// Builder: attach a scalar value per point
    pub fn values(mut self, values: Vec<f64>) -> Self {
        self.values = Some(values);
        self
    }

    /// Append a vertex, keeping the motion array all-or-nothing
    pub fn push_point(&mut self, lat: f64, lon: f64, motion: Option<MotionVector>) {
        match motion {
            Some(mv) => {
                if let Some(vectors) = self.motion.as_mut() {
                    vectors.push(mv);
                } else if self.points.is_empty() {
                    self.motion = Some(vec![mv]);
                }
            }
            None => self.motion = None,
        }
        self.points.push(LatLon { lat, lon });
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Check the parallel array invariant
    pub fn validate(&self) -> Result<(), String> {
        if let Some(motion) = &self.motion {
            if motion.len() != self.points.len() {
                return Err(format!(
                    "object '{}' has {} motion vectors for {} points",
                    self.label,
                    motion.len(),
                    self.points.len()
                ));
            }
        }
        if let Some(values) = &self.values {
            if values.len() != self.points.len() {
                return Err(format!(
                    "object '{}' has {} values for {} points",
                    self.label,
                    values.len(),
                    self.points.len()
                ));
            }
        }
        Ok(())
    }
}

/// Detection attributes of a product
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub line_type: LineType,
    pub quality_value: f64,
    pub quality_threshold: f64,
}

impl Detection {
    pub fn new(line_type: LineType, quality_value: f64, quality_threshold: f64) -> Self {
        Self {
            line_type,
            quality_value,
            quality_threshold,
        }
    }
}

/// One detection or product instance
///
/// Holds at least one object; the first object is the one the index
/// describes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShapeRecord {
    pub kind: ProductKind,
    pub sub_kind: ProductSubKind,
    pub group_id: i64,
    pub sequence_number: i64,
    pub data_time: i64,
    pub valid_time: i64,
    pub expire_time: i64,
    pub gen_time: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub motion_dir: f64,
    #[serde(default)]
    pub motion_speed: f64,
    #[serde(default)]
    pub detection: Option<Detection>,
    pub objects: Vec<PolylineObject>,
}

impl ShapeRecord {
    /// Create a record whose valid, expire and generation times equal `data_time`
    pub fn new(kind: ProductKind, sub_kind: ProductSubKind, data_time: i64) -> Self {
        Self {
            kind,
            sub_kind,
            group_id: 0,
            sequence_number: 0,
            data_time,
            valid_time: data_time,
            expire_time: data_time,
            gen_time: data_time,
            description: String::new(),
            motion_dir: 0.0,
            motion_speed: 0.0,
            detection: None,
            objects: Vec::new(),
        }
    }

    /// Builder: set group id and sequence number
    pub fn ids(mut self, group_id: i64, sequence_number: i64) -> Self {
        self.group_id = group_id;
        self.sequence_number = sequence_number;
        self
    }

    /// Builder: set valid and expire times
    pub fn valid_until(mut self, valid_time: i64, expire_time: i64) -> Self {
        self.valid_time = valid_time;
        self.expire_time = expire_time;
        self
    }

    /// Builder: set generation time
    pub fn generated_at(mut self, gen_time: i64) -> Self {
        self.gen_time = gen_time;
        self
    }

    /// Builder: set description
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Builder: set motion direction and speed
    pub fn motion(mut self, dir: f64, speed: f64) -> Self {
        self.motion_dir = dir;
        self.motion_speed = speed;
        self
    }

    /// Builder: set detection attributes
    pub fn detection(mut self, detection: Detection) -> Self {
        self.detection = Some(detection);
        self
    }

    /// Builder: add an object
    pub fn object(mut self, object: PolylineObject) -> Self {
        self.objects.push(object);
        self
    }

    /// Lead time of the first object (0 for an empty record)
    pub fn first_lead(&self) -> i64 {
        self.objects.first().map(|o| o.lead_seconds).unwrap_or(0)
    }

    /// Index of the object closest to `lead_seconds` and its lead delta
    ///
    /// A `lead_seconds` of 0 selects the first object unconditionally.
    /// Returns `None` when the closest object is further than `tolerance`.
    pub fn best_object(&self, lead_seconds: i64, tolerance: i64) -> Option<(usize, i64)> {
        if lead_seconds == 0 {
            return if self.objects.is_empty() { None } else { Some((0, 0)) };
        }

        self.objects
            .iter()
            .enumerate()
            .map(|(idx, obj)| (idx, (lead_seconds - obj.lead_seconds).abs()))
            .min_by_key(|&(idx, delta)| (delta, idx))
            .filter(|&(_, delta)| delta <= tolerance)
    }

    /// Keep only the object at `idx`
    pub fn retain_object(&mut self, idx: usize) {
        if idx < self.objects.len() {
            let object = self.objects.swap_remove(idx);
            self.objects = vec![object];
        }
    }

    /// Check structural invariants before writing
    pub fn validate(&self) -> Result<(), String> {
        if self.objects.is_empty() {
            return Err("record has no objects".to_string());
        }
        let times = [
            ("data", self.data_time),
            ("valid", self.valid_time),
            ("expire", self.expire_time),
            ("generation", self.gen_time),
        ];
        for (name, time) in times {
            if !calendar::is_representable(time) {
                return Err(format!("{} time {} is outside the calendar range", name, time));
            }
        }
        for object in &self.objects {
            object.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn front(data_time: i64) -> ShapeRecord {
        ShapeRecord::new(ProductKind::ColdFront, ProductSubKind::Detection, data_time)
            .ids(7, 3)
            .object(PolylineObject::new("t0", 0).point(40.0, -105.0).point(40.5, -104.5))
            .object(PolylineObject::new("t30", 1800).point(40.1, -104.9))
            .object(PolylineObject::new("t60", 3600).point(40.2, -104.8))
    }

    #[test]
    fn test_record_builder() {
        let record = front(1_000).description("line near DEN").motion(270.0, 8.0);
        assert_eq!(record.valid_time, 1_000);
        assert_eq!(record.expire_time, 1_000);
        assert_eq!(record.objects.len(), 3);
        assert_eq!(record.first_lead(), 0);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_best_object_selection() {
        let record = front(1_000);

        assert_eq!(record.best_object(0, 0), Some((0, 0)));
        assert_eq!(record.best_object(1800, 300), Some((1, 0)));
        assert_eq!(record.best_object(2000, 300), Some((1, 200)));
        assert_eq!(record.best_object(4000, 100), None);
        assert_eq!(record.best_object(4000, 400), Some((2, 400)));
    }

    #[test]
    fn test_retain_object() {
        let mut record = front(1_000);
        record.retain_object(1);
        assert_eq!(record.objects.len(), 1);
        assert_eq!(record.objects[0].label, "t30");
    }

    #[test]
    fn test_motion_all_or_nothing() {
        let object = PolylineObject::new("a", 0)
            .point_with_motion(40.0, -105.0, 3.0, 4.0)
            .point_with_motion(40.1, -105.1, 3.0, 4.0);
        assert_eq!(object.motion.as_ref().map(Vec::len), Some(2));

        let object = object.point(40.2, -105.2);
        assert!(object.motion.is_none());

        let object = object.point_with_motion(40.3, -105.3, 1.0, 1.0);
        assert!(object.motion.is_none());
        assert_eq!(object.len(), 4);
    }

    #[test]
    fn test_motion_sanity_bound() {
        let mv = MotionVector::sanitized(12.5, 9_000.0);
        assert_eq!(mv.u, 12.5);
        assert_eq!(mv.v, MISSING_VALUE);
        assert!(mv.is_missing());

        let mv = MotionVector::sanitized(f64::NAN, -3.0);
        assert_eq!(mv.u, MISSING_VALUE);
    }

    #[test]
    fn test_validation() {
        let empty = ShapeRecord::new(ProductKind::Boundary, ProductSubKind::Detection, 0);
        assert!(empty.validate().is_err());

        let bad = empty
            .clone()
            .object(PolylineObject::new("x", 0).point(1.0, 2.0).values(vec![1.0, 2.0]));
        assert!(bad.validate().is_err());

        let mut late = front(1_000);
        late.expire_time = i64::MAX;
        let err = late.validate().unwrap_err();
        assert!(err.contains("expire time"), "{err}");
    }

    #[test]
    fn test_record_serialization() {
        let record = front(1_000).detection(Detection::new(LineType::ColdFront, 0.8, 0.5));
        let json = serde_json::to_string(&record).unwrap();
        let restored: ShapeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, restored);
    }
}
