//! Segments: slices of pre-aggregated measure data
//!
//! A [`Segment`] describes what to aggregate: one measure of a star, grouped
//! by an ordered list of columns, each constrained by a column predicate.
//! A [`LoadedSegment`] is the published result: the segment plus its cells.
//!
//! ```text
//!   Segment (definition)         LoadedSegment (published)
//!   ┌──────────────────────┐     ┌──────────────────────────────┐
//!   │ star     sales       │     │ segment ──► Segment          │
//!   │ measure  sum(amount) │ ──► │ data     (EU, 2024) → 120.0  │
//!   │ columns  region,year │     │          (NA, 2024) →  80.5  │
//!   │ preds    *, 2024     │     └──────────────────────────────┘
//!   └──────────────────────┘
//! ```

pub mod key;
pub mod predicate;

pub use key::SegmentKey;
pub use predicate::{ColumnPredicate, CompoundPredicate, PredicateSet};

use crate::error::{ExecutionError, PlanError};
use crate::types::{Column, Datum, Measure, Star, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Segment
// ============================================================================

/// Definition of one segment
#[derive(Debug, Clone)]
pub struct Segment {
    star: Arc<Star>,
    measure: Arc<Measure>,
    columns: Arc<[Arc<Column>]>,
    predicates: PredicateSet,
    compound: Option<Arc<[CompoundPredicate]>>,
}

impl Segment {
    /// Create a segment; the predicate set must have one entry per column
    pub fn new(
        star: Arc<Star>,
        measure: Arc<Measure>,
        columns: Vec<Arc<Column>>,
        predicates: PredicateSet,
    ) -> Result<Self, PlanError> {
        if columns.len() != predicates.len() {
            return Err(PlanError::ArityMismatch {
                columns: columns.len(),
                predicates: predicates.len(),
            });
        }
        Ok(Self {
            star,
            measure,
            columns: Arc::from(columns),
            predicates,
            compound: None,
        })
    }

    /// Create segments for several measures sharing one column list and one
    /// predicate allocation
    pub fn batch(
        star: &Arc<Star>,
        measures: &[Arc<Measure>],
        columns: &[Arc<Column>],
        predicates: &PredicateSet,
    ) -> Result<Vec<Arc<Segment>>, PlanError> {
        measures
            .iter()
            .map(|m| {
                Segment::new(
                    Arc::clone(star),
                    Arc::clone(m),
                    columns.to_vec(),
                    predicates.clone(),
                )
                .map(Arc::new)
            })
            .collect()
    }

    /// Star schema the segment aggregates over
    pub fn star(&self) -> &Arc<Star> {
        &self.star
    }

    /// Aggregated measure
    pub fn measure(&self) -> &Arc<Measure> {
        &self.measure
    }

    /// Grouping columns
    pub fn columns(&self) -> &[Arc<Column>] {
        &self.columns
    }

    /// Per-column predicates
    pub fn predicates(&self) -> &PredicateSet {
        &self.predicates
    }

    /// Query-wide constraint the segment was loaded under, if any
    pub fn compound_predicates(&self) -> Option<&[CompoundPredicate]> {
        self.compound.as_deref()
    }

    /// Same segment, constrained by a query-wide compound predicate list
    ///
    /// The list becomes part of the store key: segments loaded under
    /// different compound constraints never share cells.
    pub fn with_compound_predicates(&self, compound: Arc<[CompoundPredicate]>) -> Segment {
        Segment {
            compound: Some(compound),
            ..self.clone()
        }
    }

    /// Store key of this segment
    pub fn key(&self) -> SegmentKey {
        SegmentKey::new(
            Arc::clone(&self.star.fact_table),
            Arc::clone(&self.measure),
            Arc::clone(&self.columns),
            self.predicates.clone(),
        )
        .with_compound_predicates(self.compound.clone())
    }

    /// Derive a coarser segment keeping only the columns at `positions`
    pub fn rollup(&self, positions: &[usize]) -> Result<Segment, PlanError> {
        let predicates = self.predicates.project(positions)?;
        let columns: Vec<Arc<Column>> = positions
            .iter()
            .map(|&i| Arc::clone(&self.columns[i]))
            .collect();
        Ok(Segment {
            star: Arc::clone(&self.star),
            measure: Arc::clone(&self.measure),
            columns: Arc::from(columns),
            predicates,
            compound: self.compound.clone(),
        })
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Segment {{measure={}, columns=[", self.measure)?;
        for (i, (column, predicate)) in self.columns.iter().zip(self.predicates.iter()).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match predicate.to_sql(&column.expr()) {
                Some(condition) => write!(f, "{}", condition)?,
                None => write!(f, "{}=*", column)?,
            }
        }
        write!(f, "]}}")
    }
}

// ============================================================================
// Segment Data
// ============================================================================

/// Cells of a loaded segment keyed by their column coordinates
#[derive(Debug, Clone, Default)]
pub struct SegmentData {
    arity: usize,
    cells: HashMap<Box<[Value]>, Datum>,
}

impl SegmentData {
    /// Create an empty body for a segment with `arity` grouping columns
    pub fn new(arity: usize) -> Self {
        Self {
            arity,
            cells: HashMap::new(),
        }
    }

    /// Add a cell; coordinates must match the arity and be unique
    pub fn insert(&mut self, coordinates: Vec<Value>, value: Datum) -> Result<(), ExecutionError> {
        if coordinates.len() != self.arity {
            return Err(ExecutionError::Decode(format!(
                "cell has {} coordinates, segment has {} columns",
                coordinates.len(),
                self.arity
            )));
        }
        let coordinates = coordinates.into_boxed_slice();
        if self.cells.contains_key(&coordinates) {
            return Err(ExecutionError::Decode(format!(
                "duplicate cell at {:?}",
                coordinates
            )));
        }
        self.cells.insert(coordinates, value);
        Ok(())
    }

    /// Look up a cell
    pub fn get(&self, coordinates: &[Value]) -> Option<&Datum> {
        self.cells.get(coordinates)
    }

    /// Number of grouping columns
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the segment has no cells
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Iterate over cells in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (&[Value], &Datum)> {
        self.cells.iter().map(|(k, v)| (&k[..], v))
    }
}

/// A segment filled with data; immutable once published
#[derive(Debug, Clone)]
pub struct LoadedSegment {
    /// Segment definition
    pub segment: Arc<Segment>,
    /// Loaded cells
    pub data: SegmentData,
}

impl LoadedSegment {
    /// Pair a definition with its data
    pub fn new(segment: Arc<Segment>, data: SegmentData) -> Self {
        Self { segment, data }
    }

    /// Store key of the underlying segment
    pub fn key(&self) -> SegmentKey {
        self.segment.key()
    }
}
