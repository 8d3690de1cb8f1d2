//! Query specifications: what a segment query selects, filters and groups
//!
//! A [`QuerySpec`] exposes positional accessors (`m<i>` measure aliases,
//! `c<i>` column aliases) and writes itself into a [`QueryBuilder`]. The
//! aliases depend on position only, so rows can be decoded without knowing
//! the underlying column or measure names.
//!
//! [`AggregateQuerySpec`] loads several segments in one statement. All of
//! them must share the predicate shape of the first default segment; this
//! is checked when the query is planned and a mismatch is a caller bug.

use super::grouping_sets::GroupingSetsList;
use super::sql::{QueryBuilder, ResultLayout, SqlQuery};
use crate::error::PlanError;
use crate::segment::{ColumnPredicate, CompoundPredicate, Segment};
use crate::types::{Column, Measure, Star};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Query Spec Contract
// ============================================================================

/// Positional description of one aggregate query
pub trait QuerySpec {
    /// Star schema the query reads
    fn star(&self) -> &Arc<Star>;

    /// Number of measures selected
    fn measure_count(&self) -> usize;

    /// Measure at position `i`
    fn measure_at(&self, i: usize) -> Result<&Arc<Measure>, PlanError>;

    /// Result column alias of measure `i`
    fn measure_alias_at(&self, i: usize) -> String {
        format!("m{}", i)
    }

    /// Grouping columns, in result order
    fn columns(&self) -> &[Arc<Column>];

    /// Result column alias of grouping column `i`
    fn column_alias_at(&self, i: usize) -> String {
        format!("c{}", i)
    }

    /// Predicate constraining grouping column `i`
    fn predicate_at(&self, i: usize) -> Result<&ColumnPredicate, PlanError>;

    /// Conditions for the WHERE clause
    fn predicate_list(&self) -> Result<Vec<CompoundPredicate>, PlanError> {
        column_predicate_list(self)
    }

    /// Whether the query groups (and therefore aggregates)
    fn is_aggregate(&self) -> bool;

    /// Emit grouping sets, referencing already-selected expressions by alias
    fn add_grouping_sets(&self, _query: &mut dyn QueryBuilder, _aliases: &HashMap<String, String>) {}

    /// Emit grouping indicator columns
    fn add_grouping_functions(&self, _query: &mut dyn QueryBuilder) {}

    /// Write the whole query into `query`
    ///
    /// Returns the expression-to-alias map of the selected grouping columns.
    fn generate(&self, query: &mut dyn QueryBuilder) -> Result<HashMap<String, String>, PlanError> {
        let mut aliases = HashMap::new();
        for (i, column) in self.columns().iter().enumerate() {
            let expr = column.expr();
            query.add_from(&column.table);
            let alias = query.add_select(&expr, &self.column_alias_at(i));
            if self.is_aggregate() {
                query.add_group_by(&expr);
            }
            aliases.insert(expr, alias);
        }

        for predicate in self.predicate_list()? {
            for column in predicate.columns() {
                query.add_from(&column.table);
            }
            query.add_where(predicate.to_sql());
        }

        for i in 0..self.measure_count() {
            let measure = self.measure_at(i)?;
            query.add_from(&measure.table);
            query.add_select(&measure.aggregate_expr(), &self.measure_alias_at(i));
        }

        if self.is_aggregate() {
            self.add_grouping_sets(query, &aliases);
            self.add_grouping_functions(query);
        }
        Ok(aliases)
    }
}

/// One condition per constrained grouping column
fn column_predicate_list<S: QuerySpec + ?Sized>(spec: &S) -> Result<Vec<CompoundPredicate>, PlanError> {
    let mut list = Vec::new();
    for (i, column) in spec.columns().iter().enumerate() {
        let predicate = spec.predicate_at(i)?;
        if !predicate.is_all() {
            list.push(CompoundPredicate::Column {
                column: Arc::clone(column),
                predicate: predicate.clone(),
            });
        }
    }
    Ok(list)
}

// ============================================================================
// Aggregate Query Spec
// ============================================================================

/// Check that every segment matches the first one's grouping and predicate shape
pub fn validate_shape(segments: &[Arc<Segment>]) -> Result<(), PlanError> {
    let reference = segments
        .first()
        .ok_or_else(|| PlanError::EmptyBatch("no segments to compare".into()))?;
    for (i, segment) in segments.iter().enumerate().skip(1) {
        if segment.columns() != reference.columns() {
            return Err(PlanError::PredicateShapeMismatch {
                segment: i,
                reason: "grouping columns differ from reference".to_string(),
            });
        }
        if let Some(reason) = reference.predicates().shape_difference(segment.predicates()) {
            return Err(PlanError::PredicateShapeMismatch { segment: i, reason });
        }
        if segment.compound_predicates() != reference.compound_predicates() {
            return Err(PlanError::PredicateShapeMismatch {
                segment: i,
                reason: "compound predicates differ from reference".to_string(),
            });
        }
    }
    Ok(())
}

/// Loads a batch of same-shape segments, with optional rollups, in one query
#[derive(Debug, Clone)]
pub struct AggregateQuerySpec {
    grouping_sets_list: GroupingSetsList,
    compound_predicates: Option<Vec<CompoundPredicate>>,
}

impl AggregateQuerySpec {
    /// Build a spec, checking that every grouping set is uniformly shaped
    ///
    /// A compound predicate list, when given, replaces the per-column
    /// conditions of the WHERE clause. Without one, the constraint the
    /// segments themselves carry is used.
    pub fn new(
        grouping_sets_list: GroupingSetsList,
        compound_predicates: Option<Vec<CompoundPredicate>>,
    ) -> Result<Self, PlanError> {
        for set in grouping_sets_list.grouping_sets() {
            validate_shape(set.segments())?;
        }
        let compound_predicates = compound_predicates.or_else(|| {
            grouping_sets_list.default_segments()[0]
                .compound_predicates()
                .map(<[CompoundPredicate]>::to_vec)
        });
        tracing::trace!(
            segments = grouping_sets_list.default_segments().len(),
            grouping_sets = grouping_sets_list.grouping_sets().len(),
            compound = compound_predicates.is_some(),
            "Built aggregate query spec"
        );
        Ok(Self {
            grouping_sets_list,
            compound_predicates,
        })
    }

    /// Re-check the shape of every grouping set
    pub fn is_valid(&self) -> bool {
        self.grouping_sets_list
            .grouping_sets()
            .iter()
            .all(|set| validate_shape(set.segments()).is_ok())
    }

    /// Segments of the finest grouping
    pub fn segments(&self) -> &[Arc<Segment>] {
        self.grouping_sets_list.default_segments()
    }

    /// Grouping sets the query covers
    pub fn grouping_sets_list(&self) -> &GroupingSetsList {
        &self.grouping_sets_list
    }

    /// Compound predicate override, if any
    pub fn compound_predicates(&self) -> Option<&[CompoundPredicate]> {
        self.compound_predicates.as_deref()
    }

    /// Positions of the result columns
    pub fn layout(&self) -> ResultLayout {
        ResultLayout {
            columns: self.columns().len(),
            measures: self.measure_count(),
            indicators: self.grouping_sets_list.rollup_columns().len(),
        }
    }

    /// Render through the reference SQL builder
    pub fn to_sql(&self) -> Result<String, PlanError> {
        let mut query = SqlQuery::new(Arc::clone(self.star()));
        self.generate(&mut query)?;
        Ok(query.to_sql())
    }

    fn segment0(&self) -> &Arc<Segment> {
        &self.grouping_sets_list.default_segments()[0]
    }
}

impl QuerySpec for AggregateQuerySpec {
    fn star(&self) -> &Arc<Star> {
        self.grouping_sets_list.star()
    }

    fn measure_count(&self) -> usize {
        self.segments().len()
    }

    fn measure_at(&self, i: usize) -> Result<&Arc<Measure>, PlanError> {
        let segments = self.segments();
        segments
            .get(i)
            .map(|s| s.measure())
            .ok_or(PlanError::IndexOutOfRange {
                what: "measures",
                index: i,
                len: segments.len(),
            })
    }

    fn columns(&self) -> &[Arc<Column>] {
        self.segment0().columns()
    }

    fn predicate_at(&self, i: usize) -> Result<&ColumnPredicate, PlanError> {
        let predicates = self.segment0().predicates();
        predicates.get(i).ok_or(PlanError::IndexOutOfRange {
            what: "column predicates",
            index: i,
            len: predicates.len(),
        })
    }

    fn predicate_list(&self) -> Result<Vec<CompoundPredicate>, PlanError> {
        match &self.compound_predicates {
            Some(list) => Ok(list.clone()),
            None => column_predicate_list(self),
        }
    }

    fn is_aggregate(&self) -> bool {
        true
    }

    fn add_grouping_sets(&self, query: &mut dyn QueryBuilder, aliases: &HashMap<String, String>) {
        for columns in self.grouping_sets_list.grouping_sets_columns() {
            let items = columns
                .iter()
                .map(|column| {
                    let expr = column.expr();
                    aliases.get(&expr).cloned().unwrap_or(expr)
                })
                .collect();
            query.add_grouping_set(items);
        }
    }

    fn add_grouping_functions(&self, query: &mut dyn QueryBuilder) {
        for column in self.grouping_sets_list.rollup_columns() {
            query.add_grouping_function(&column.expr());
        }
    }
}
