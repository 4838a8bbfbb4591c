//! # Shapelog
//!
//! Indexed per-day log store for meteorological shape records (boundaries,
//! fronts, gust fronts and their extrapolations), with time-windowed
//! nearest-match lookups.
//!
//! ## Features
//!
//! - **Append-only day logs**: one text log per UTC day and series suffix
//! - **Derived indexes**: kept on disk next to the logs, extended
//!   incrementally as logs grow and rebuilt when a log is rewritten
//! - **Shared index cache**: concurrent readers reuse validated indexes
//! - **Windowed queries**: closest, closest-before, closest-after and all,
//!   optionally matched on extrapolation lead time and product type
//!
//! ## Modules
//!
//! - [`storage`]: Record types, log framing and the `ShapeStore` facade
//! - [`index`]: Per-day index files, cache and maintenance
//! - [`query`]: Read requests and the query engine
//! - [`config`]: TOML configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shapelog::{PolylineObject, ProductKind, ProductSubKind, ReadMode, ShapeRecord, ShapeStore, StoreConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = ShapeStore::open(StoreConfig::new("./shapes").suffix("bdry"))?;
//!
//!     store.append(
//!         &ShapeRecord::new(ProductKind::Boundary, ProductSubKind::Detection, 1_717_243_200)
//!             .object(PolylineObject::new("b1", 0).point(35.2, -97.4).point(35.3, -97.2)),
//!     )?;
//!
//!     let request = store.request(ReadMode::Closest, 1_717_243_500).window(900);
//!     for record in store.query(&request)? {
//!         println!("{} at {}", record.kind, record.data_time);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod index;
pub mod query;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    Detection, LatLon, LineType, MotionVector, PolylineObject, ProductKind, ProductSubKind,
    ShapeRecord, ShapeStore, StoreConfig, StoreError, StoreResult, StoreStats,
};

pub use index::{IndexCache, IndexEntry, IndexFile, IndexMaintainer, MaintenanceStats};

pub use query::{QueryEngine, QueryError, QueryOutcome, QueryResult, ReadMode, ReadRequest};

pub use config::{Config, ConfigError, LoadReport, LoggingConfig};
