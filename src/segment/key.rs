//! Segment identity used as the single-flight store key

use crate::segment::predicate::{CompoundPredicate, PredicateSet};
use crate::types::{Column, Measure};
use std::fmt;
use std::sync::Arc;

/// Identity of "the aggregate of measure M over predicate shape P"
///
/// Equality and hashing are structural over every part, including the
/// query-wide compound constraint. Keys are immutable and cheap to clone:
/// every part is reference counted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    star: Arc<str>,
    measure: Arc<Measure>,
    columns: Arc<[Arc<Column>]>,
    predicates: PredicateSet,
    compound: Option<Arc<[CompoundPredicate]>>,
}

impl SegmentKey {
    /// Create a key
    pub fn new(
        star: Arc<str>,
        measure: Arc<Measure>,
        columns: Arc<[Arc<Column>]>,
        predicates: PredicateSet,
    ) -> Self {
        Self {
            star,
            measure,
            columns,
            predicates,
            compound: None,
        }
    }

    /// Attach the compound constraint the segment is loaded under
    pub fn with_compound_predicates(mut self, compound: Option<Arc<[CompoundPredicate]>>) -> Self {
        self.compound = compound;
        self
    }

    /// Fact table the segment aggregates
    pub fn star(&self) -> &str {
        &self.star
    }

    /// Aggregated measure
    pub fn measure(&self) -> &Measure {
        &self.measure
    }

    /// Grouping columns, in order
    pub fn columns(&self) -> &[Arc<Column>] {
        &self.columns
    }

    /// Per-column predicates
    pub fn predicates(&self) -> &PredicateSet {
        &self.predicates
    }

    /// Compound constraint, if any
    pub fn compound_predicates(&self) -> Option<&[CompoundPredicate]> {
        self.compound.as_deref()
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}[", self.star, self.measure.name)?;
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", column)?;
        }
        write!(f, "]")?;
        if let Some(compound) = &self.compound {
            let conditions: Vec<String> = compound.iter().map(CompoundPredicate::to_sql).collect();
            write!(f, " where {}", conditions.join(" AND "))?;
        }
        Ok(())
    }
}
