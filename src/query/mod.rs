//! Time-windowed lookups over the shape logs
//!
//! - **Request**: read modes, window arithmetic and validation
//! - **Engine**: day selection, scoring and record materialization
//!
//! # Examples
//!
//! ```rust,no_run
//! use shapelog::index::{IndexCache, IndexMaintainer};
//! use shapelog::query::{QueryEngine, ReadMode, ReadRequest};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let maintainer = Arc::new(IndexMaintainer::new(Arc::new(IndexCache::new())));
//! let engine = QueryEngine::new(maintainer);
//!
//! // the 30-minute extrapolation nearest 12:00 UTC, 1 June 2024
//! let request = ReadRequest::new(ReadMode::Closest, 1_717_243_200, "/data/shapes", "bdry")
//!     .window(1800)
//!     .lead(1800, 300);
//! let records = engine.query(&request)?;
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
mod request;

pub use engine::{QueryEngine, QueryOutcome, DEFAULT_MIDNIGHT_FALLBACK_HOURS};
pub use error::{QueryError, QueryResult};
pub use request::{ReadMode, ReadRequest, DEFAULT_LEAD_TOLERANCE_SECS, DEFAULT_WINDOW_SECS};
