//! Kuba OLAP - segment loading with single-flight caching and grouping sets
//!
//! This library loads cell segments of a star schema for an OLAP engine:
//! - Batches same-shape segments into one aggregate SQL statement
//! - Loads rollups in the same scan with `GROUPING SETS`
//! - Collapses concurrent requests for a segment into one load
//! - Decodes result rows back onto segments by positional alias
//!
//! # Example
//!
//! ```rust
//! use kuba_olap::loader::{ResultSet, SegmentBatch, SegmentLoader};
//! use kuba_olap::plan::SqlStatement;
//! use kuba_olap::segment::{PredicateSet, Segment};
//! use kuba_olap::types::{Aggregator, Column, Datum, Measure, Star};
//! use kuba_olap::error::ExecutionError;
//! use std::sync::Arc;
//!
//! let executor = |_: &SqlStatement| -> Result<ResultSet, ExecutionError> {
//!     Ok(ResultSet::from_rows(vec![vec![Datum::Str("EU".into()), Datum::Float(12.5)]]))
//! };
//! let loader = SegmentLoader::builder().with_executor(executor).build().unwrap();
//!
//! let star = Arc::new(Star::new("sales").with_link("store", "store_id", "id"));
//! let columns = vec![Arc::new(Column::new("store", "region"))];
//! let measures = vec![Arc::new(Measure::new("Sales", "sales", Some("amount"), Aggregator::Sum))];
//! let segments = Segment::batch(&star, &measures, &columns, &PredicateSet::unconstrained(1)).unwrap();
//!
//! let loaded = loader.load(SegmentBatch::new(segments).unwrap()).unwrap();
//! assert_eq!(loaded[0].data.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

/// Segment definitions, keys and predicates
pub mod segment;

/// Single-flight result store with bounded and cancellable waits
pub mod flight;

/// Query planning: grouping sets, query specs and SQL rendering
pub mod plan;

/// Segment loading through the store and an external executor
pub mod loader;

/// Configuration management with TOML support
pub mod config;

/// Prometheus metrics on an explicitly owned registry
pub mod metrics;

// Re-export main types
pub use config::Config;
pub use error::{Error, Result};
pub use flight::{CancellationToken, SingleFlightStore};
pub use loader::{SegmentBatch, SegmentLoader};
pub use segment::{LoadedSegment, Segment, SegmentKey};
