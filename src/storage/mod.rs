//! Shape Storage
//!
//! This module provides the log side of the store:
//!
//! - **types**: Core data structures (ShapeRecord, PolylineObject, Detection)
//! - **vocab**: Product and line type tags
//! - **calendar**: UTC day arithmetic and file name stamps
//! - **codec**: Line-oriented text framing of records
//! - **log**: Per-day append-only log files
//! - **engine**: The `ShapeStore` facade over logs, indexes and queries
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   ShapeRecord → encode → append → {data_dir}/{YYYYMMDD}.{suffix}
//!
//! Read Path:
//!   ReadRequest → ensure_index (per day) → score entries → read_at → ShapeRecord
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use shapelog::storage::{
//!     PolylineObject, ProductKind, ProductSubKind, ShapeRecord, ShapeStore, StoreConfig,
//! };
//! use shapelog::query::ReadMode;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = ShapeStore::open(StoreConfig::new("./shapes").suffix("bdry"))?;
//!
//!     // Append a detection with a 30-minute extrapolation
//!     let record = ShapeRecord::new(ProductKind::GustFront, ProductSubKind::Detection, 1_717_243_200)
//!         .object(PolylineObject::new("gf", 0).point(39.7, -104.9).point(39.8, -104.8))
//!         .object(PolylineObject::new("gf+30", 1800).point(39.8, -104.7).point(39.9, -104.6));
//!     store.append(&record)?;
//!
//!     // Find the record nearest noon
//!     let request = store.request(ReadMode::Closest, 1_717_243_200).window(900);
//!     let records = store.query(&request)?;
//!
//!     Ok(())
//! }
//! ```

pub mod calendar;
pub mod codec;
pub mod engine;
pub mod error;
pub mod log;
pub mod types;
pub mod vocab;

// Re-export commonly used types
pub use codec::{encode_record, RecordReader};
pub use engine::{ShapeStore, StoreConfig, StoreStats};
pub use error::{StoreError, StoreResult};
pub use log::LogScanner;
pub use types::{
    Detection, LatLon, MotionVector, PolylineObject, ShapeRecord, MAX_MOTION_COMPONENT,
    MISSING_VALUE,
};
pub use vocab::{LineType, ProductKind, ProductSubKind, Symbol};
