//! Grouping sets: one finest grouping plus coarser rollups in one scan
//!
//! The first [`GroupingSet`] is the finest grouping; its segments are the
//! "default" segments of the query. Every later set groups by a subset of
//! the finest columns and carries the same measures in the same order.
//! Finest columns missing from at least one set are the *rollup columns*;
//! the query emits a `GROUPING(expr)` indicator for each so rollup rows can
//! be told apart from genuine NULL members.
//!
//! ```text
//!   finest   (region, country, year)   rollup pattern [0, 0]
//!   set 1    (region, year)            rollup pattern [1, 0]   country rolled up
//!   set 2    (region)                  rollup pattern [1, 1]   country, year rolled up
//!   rollup columns = [country, year]
//! ```

use crate::error::PlanError;
use crate::segment::{CompoundPredicate, Segment};
use crate::types::{Column, Measure, Star};
use std::sync::Arc;

// ============================================================================
// Grouping Set
// ============================================================================

/// Segments sharing one grouping (column list and predicate shape)
#[derive(Debug, Clone)]
pub struct GroupingSet {
    segments: Vec<Arc<Segment>>,
    columns: Vec<Arc<Column>>,
}

impl GroupingSet {
    /// Create a grouping set; columns are taken from the first segment
    pub fn new(segments: Vec<Arc<Segment>>) -> Result<Self, PlanError> {
        let columns = match segments.first() {
            Some(first) => first.columns().to_vec(),
            None => return Err(PlanError::EmptyBatch("grouping set has no segments".into())),
        };
        Ok(Self { segments, columns })
    }

    /// Segments, one per measure
    pub fn segments(&self) -> &[Arc<Segment>] {
        &self.segments
    }

    /// Grouping columns
    pub fn columns(&self) -> &[Arc<Column>] {
        &self.columns
    }

    /// Measures in segment order
    pub fn measures(&self) -> impl Iterator<Item = &Arc<Measure>> {
        self.segments.iter().map(|s| s.measure())
    }

    /// Same grouping with every segment constrained by `compound`
    pub fn with_compound_predicates(&self, compound: &Arc<[CompoundPredicate]>) -> GroupingSet {
        GroupingSet {
            segments: self
                .segments
                .iter()
                .map(|s| Arc::new(s.with_compound_predicates(Arc::clone(compound))))
                .collect(),
            columns: self.columns.clone(),
        }
    }
}

// ============================================================================
// Grouping Sets List
// ============================================================================

/// The grouping sets of one query plan, finest first
#[derive(Debug, Clone)]
pub struct GroupingSetsList {
    star: Arc<Star>,
    grouping_sets: Vec<GroupingSet>,
    rollup_columns: Vec<Arc<Column>>,
    grouping_sets_columns: Vec<Vec<Arc<Column>>>,
    rollup_patterns: Vec<Vec<bool>>,
    positions: Vec<Vec<usize>>,
}

impl GroupingSetsList {
    /// Build from grouping sets; the first must be the finest
    pub fn new(grouping_sets: Vec<GroupingSet>) -> Result<Self, PlanError> {
        let finest = grouping_sets
            .first()
            .ok_or_else(|| PlanError::EmptyBatch("no grouping sets".into()))?;
        let star = Arc::clone(finest.segments[0].star());
        let finest_columns = finest.columns().to_vec();

        let mut positions = Vec::with_capacity(grouping_sets.len());
        for (set_index, set) in grouping_sets.iter().enumerate() {
            let mut set_positions = Vec::with_capacity(set.columns().len());
            for column in set.columns() {
                match finest_columns.iter().position(|c| c == column) {
                    Some(p) => set_positions.push(p),
                    None => {
                        return Err(PlanError::GroupingSetNotSubset {
                            set: set_index,
                            column: column.expr(),
                        })
                    }
                }
            }
            if set_index > 0 {
                Self::check_measures(finest, set, set_index)?;
                Self::check_rollup_predicates(finest, set, set_index, &set_positions)?;
            }
            positions.push(set_positions);
        }

        let use_grouping_sets = grouping_sets.len() > 1;
        let (rollup_columns, grouping_sets_columns) = if use_grouping_sets {
            let rollup: Vec<Arc<Column>> = finest_columns
                .iter()
                .filter(|c| grouping_sets.iter().any(|set| !set.columns().contains(c)))
                .cloned()
                .collect();
            let sets: Vec<Vec<Arc<Column>>> =
                grouping_sets.iter().map(|s| s.columns().to_vec()).collect();
            (rollup, sets)
        } else {
            (Vec::new(), Vec::new())
        };

        let rollup_patterns = grouping_sets
            .iter()
            .map(|set| {
                rollup_columns
                    .iter()
                    .map(|c| !set.columns().contains(c))
                    .collect()
            })
            .collect();

        Ok(Self {
            star,
            grouping_sets,
            rollup_columns,
            grouping_sets_columns,
            rollup_patterns,
            positions,
        })
    }

    /// Build a list holding a single (finest) grouping set
    pub fn single(segments: Vec<Arc<Segment>>) -> Result<Self, PlanError> {
        Self::new(vec![GroupingSet::new(segments)?])
    }

    fn check_measures(finest: &GroupingSet, set: &GroupingSet, set_index: usize) -> Result<(), PlanError> {
        if set.segments().len() != finest.segments().len() {
            return Err(PlanError::MeasureMismatch {
                set: set_index,
                reason: format!(
                    "{} measures, finest grouping has {}",
                    set.segments().len(),
                    finest.segments().len()
                ),
            });
        }
        for (i, (a, b)) in finest.measures().zip(set.measures()).enumerate() {
            if a != b {
                return Err(PlanError::MeasureMismatch {
                    set: set_index,
                    reason: format!("measure {} is {}, finest grouping has {}", i, b, a),
                });
            }
        }
        Ok(())
    }

    /// Kept columns must carry the finest predicate; dropped ones must be unconstrained
    fn check_rollup_predicates(
        finest: &GroupingSet,
        set: &GroupingSet,
        set_index: usize,
        set_positions: &[usize],
    ) -> Result<(), PlanError> {
        if set.segments[0].compound_predicates() != finest.segments[0].compound_predicates() {
            return Err(PlanError::RollupPredicateMismatch {
                set: set_index,
                column: "compound predicates".to_string(),
            });
        }
        let finest_predicates = finest.segments[0].predicates();
        let set_predicates = set.segments[0].predicates();
        for (p, column) in finest.columns().iter().enumerate() {
            let consistent = match set_positions.iter().position(|&fp| fp == p) {
                Some(q) => set_predicates.get(q) == finest_predicates.get(p),
                None => finest_predicates[p].is_all(),
            };
            if !consistent {
                return Err(PlanError::RollupPredicateMismatch {
                    set: set_index,
                    column: column.expr(),
                });
            }
        }
        Ok(())
    }

    /// Star schema of the query
    pub fn star(&self) -> &Arc<Star> {
        &self.star
    }

    /// Whether more than one grouping set is present
    pub fn use_grouping_sets(&self) -> bool {
        self.grouping_sets.len() > 1
    }

    /// All grouping sets, finest first
    pub fn grouping_sets(&self) -> &[GroupingSet] {
        &self.grouping_sets
    }

    /// Segments of the finest grouping
    pub fn default_segments(&self) -> &[Arc<Segment>] {
        self.grouping_sets[0].segments()
    }

    /// Finest columns rolled up by at least one grouping set
    pub fn rollup_columns(&self) -> &[Arc<Column>] {
        &self.rollup_columns
    }

    /// Column lists to emit as grouping sets; empty without rollups
    pub fn grouping_sets_columns(&self) -> &[Vec<Arc<Column>>] {
        &self.grouping_sets_columns
    }

    /// For set `index`, which rollup columns it rolls up
    pub fn rollup_pattern(&self, index: usize) -> Option<&[bool]> {
        self.rollup_patterns.get(index).map(Vec::as_slice)
    }

    /// For set `index`, the finest-column position of each of its columns
    pub fn positions_in_finest(&self, index: usize) -> Option<&[usize]> {
        self.positions.get(index).map(Vec::as_slice)
    }

    /// Grouping set a result row belongs to, given its grouping indicators
    pub fn grouping_set_index_for(&self, indicators: &[bool]) -> Option<usize> {
        self.rollup_patterns.iter().position(|p| p.as_slice() == indicators)
    }

    /// Every segment of every grouping set, finest first
    pub fn all_segments(&self) -> impl Iterator<Item = &Arc<Segment>> {
        self.grouping_sets.iter().flat_map(|set| set.segments().iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{ColumnPredicate, PredicateSet};
    use crate::types::{Aggregator, Value};

    fn fixture() -> (Arc<Star>, Vec<Arc<Column>>, Vec<Arc<Measure>>) {
        let star = Arc::new(Star::new("sales").with_link("store", "store_id", "id"));
        let columns = vec![
            Arc::new(Column::new("store", "region")),
            Arc::new(Column::new("store", "country")),
            Arc::new(Column::new("sales", "year")),
        ];
        let measures = vec![
            Arc::new(Measure::new("Sales", "sales", Some("amount"), Aggregator::Sum)),
            Arc::new(Measure::new("Customers", "sales", Some("customer_id"), Aggregator::DistinctCount)),
        ];
        (star, columns, measures)
    }

    fn set(star: &Arc<Star>, measures: &[Arc<Measure>], columns: &[Arc<Column>]) -> GroupingSet {
        let predicates = PredicateSet::unconstrained(columns.len());
        GroupingSet::new(Segment::batch(star, measures, columns, &predicates).unwrap()).unwrap()
    }

    #[test]
    fn test_single_set_has_no_rollups() {
        let (star, columns, measures) = fixture();
        let list = GroupingSetsList::new(vec![set(&star, &measures, &columns)]).unwrap();
        assert!(!list.use_grouping_sets());
        assert!(list.rollup_columns().is_empty());
        assert!(list.grouping_sets_columns().is_empty());
        assert_eq!(list.grouping_set_index_for(&[]), Some(0));
        assert_eq!(list.default_segments().len(), 2);
    }

    #[test]
    fn test_rollup_columns_and_patterns() {
        let (star, columns, measures) = fixture();
        let finest = set(&star, &measures, &columns);
        let by_region_year = set(&star, &measures, &[Arc::clone(&columns[0]), Arc::clone(&columns[2])]);
        let by_region = set(&star, &measures, &columns[..1]);

        let list = GroupingSetsList::new(vec![finest, by_region_year, by_region]).unwrap();
        let rollup: Vec<String> = list.rollup_columns().iter().map(|c| c.expr()).collect();
        assert_eq!(rollup, vec!["store.country", "sales.year"]);
        assert_eq!(list.rollup_pattern(0), Some(&[false, false][..]));
        assert_eq!(list.rollup_pattern(1), Some(&[true, false][..]));
        assert_eq!(list.rollup_pattern(2), Some(&[true, true][..]));
        assert_eq!(list.grouping_set_index_for(&[true, false]), Some(1));
        assert_eq!(list.grouping_set_index_for(&[false, true]), None);
        assert_eq!(list.positions_in_finest(1), Some(&[0, 2][..]));
        assert_eq!(list.all_segments().count(), 6);
    }

    #[test]
    fn test_rejects_non_subset() {
        let (star, columns, measures) = fixture();
        let finest = set(&star, &measures, &columns[..2]);
        let other = set(&star, &measures, &columns[2..]);
        let err = GroupingSetsList::new(vec![finest, other]).unwrap_err();
        assert!(matches!(err, PlanError::GroupingSetNotSubset { set: 1, .. }));
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_rejects_measure_mismatch() {
        let (star, columns, measures) = fixture();
        let finest = set(&star, &measures, &columns);
        let fewer = set(&star, &measures[..1], &columns[..1]);
        let err = GroupingSetsList::new(vec![finest, fewer]).unwrap_err();
        assert!(matches!(err, PlanError::MeasureMismatch { set: 1, .. }));
    }

    #[test]
    fn test_rejects_rollup_over_constrained_column() {
        let (star, columns, measures) = fixture();
        let predicates = PredicateSet::new(vec![
            ColumnPredicate::All,
            ColumnPredicate::All,
            ColumnPredicate::Equals(Value::Int(2024)),
        ]);
        let finest = Segment::batch(&star, &measures, &columns, &predicates).unwrap();
        let drop_year: Vec<Arc<Segment>> = finest.iter().map(|s| Arc::new(s.rollup(&[0, 1]).unwrap())).collect();
        let keep_year: Vec<Arc<Segment>> = finest.iter().map(|s| Arc::new(s.rollup(&[0, 2]).unwrap())).collect();

        let err = GroupingSetsList::new(vec![
            GroupingSet::new(finest.clone()).unwrap(),
            GroupingSet::new(drop_year).unwrap(),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            PlanError::RollupPredicateMismatch {
                set: 1,
                column: "sales.year".to_string()
            }
        );

        let list = GroupingSetsList::new(vec![
            GroupingSet::new(finest).unwrap(),
            GroupingSet::new(keep_year).unwrap(),
        ])
        .unwrap();
        assert_eq!(list.rollup_columns()[0].expr(), "store.country");
    }

    #[test]
    fn test_rejects_mixed_compound_constraints() {
        let (star, columns, measures) = fixture();
        let finest = set(&star, &measures, &columns);
        let rollup = set(&star, &measures, &columns[..1]);
        let compound: Arc<[CompoundPredicate]> = Arc::from(vec![CompoundPredicate::Column {
            column: Arc::clone(&columns[0]),
            predicate: ColumnPredicate::Equals(Value::str("EU")),
        }]);

        let err = GroupingSetsList::new(vec![finest.with_compound_predicates(&compound), rollup.clone()])
            .unwrap_err();
        assert!(matches!(err, PlanError::RollupPredicateMismatch { set: 1, .. }));

        let list = GroupingSetsList::new(vec![
            finest.with_compound_predicates(&compound),
            rollup.with_compound_predicates(&compound),
        ])
        .unwrap();
        assert!(list
            .all_segments()
            .all(|s| s.compound_predicates() == Some(&compound[..])));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(
            GroupingSetsList::new(Vec::new()),
            Err(PlanError::EmptyBatch(_))
        ));
        assert!(GroupingSet::new(Vec::new()).is_err());
    }
}
