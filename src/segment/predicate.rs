//! Column predicates and the shared predicate shape of a segment batch
//!
//! Every segment carries one [`ColumnPredicate`] per grouping column. The
//! segments that are batched into one query share the same
//! [`PredicateSet`], usually by reference. [`CompoundPredicate`]s constrain
//! several columns at once (`(region, country) IN (...)`) and apply to the
//! whole query.

use crate::error::PlanError;
use crate::types::{Column, Value};
use std::hash::{Hash, Hasher};
use std::ops::{Bound, Deref};
use std::sync::Arc;

// ============================================================================
// Column Predicate
// ============================================================================

/// Constraint on the values of a single column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnPredicate {
    /// No constraint
    All,
    /// Column equals the value (`IS NULL` for null)
    Equals(Value),
    /// Column is one of the values
    In(Vec<Value>),
    /// Column lies within the range
    Range {
        /// Lower bound
        lower: Bound<Value>,
        /// Upper bound
        upper: Bound<Value>,
    },
}

impl ColumnPredicate {
    /// Build a list predicate, collapsing a single value to `Equals`
    pub fn values(values: impl IntoIterator<Item = Value>) -> Self {
        let mut values: Vec<Value> = values.into_iter().collect();
        if values.len() == 1 {
            if let Some(v) = values.pop() {
                return ColumnPredicate::Equals(v);
            }
        }
        ColumnPredicate::In(values)
    }

    /// Whether this predicate lets every value through
    pub fn is_all(&self) -> bool {
        matches!(self, ColumnPredicate::All)
            || matches!(
                self,
                ColumnPredicate::Range {
                    lower: Bound::Unbounded,
                    upper: Bound::Unbounded
                }
            )
    }

    /// Render as a SQL condition over `expr`
    ///
    /// Returns `None` when the predicate constrains nothing.
    pub fn to_sql(&self, expr: &str) -> Option<String> {
        match self {
            ColumnPredicate::All => None,
            ColumnPredicate::Equals(Value::Null) => Some(format!("{} IS NULL", expr)),
            ColumnPredicate::Equals(v) => Some(format!("{} = {}", expr, v.to_sql_literal())),
            ColumnPredicate::In(values) => {
                if values.is_empty() {
                    return Some("1 = 0".to_string());
                }
                let has_null = values.iter().any(Value::is_null);
                let literals: Vec<String> = values
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(Value::to_sql_literal)
                    .collect();
                let in_list = format!("{} IN ({})", expr, literals.join(", "));
                match (literals.is_empty(), has_null) {
                    (true, _) => Some(format!("{} IS NULL", expr)),
                    (false, true) => Some(format!("({} OR {} IS NULL)", in_list, expr)),
                    (false, false) => Some(in_list),
                }
            }
            ColumnPredicate::Range { lower, upper } => {
                let mut parts = Vec::with_capacity(2);
                match lower {
                    Bound::Included(l) => parts.push(format!("{} >= {}", expr, l.to_sql_literal())),
                    Bound::Excluded(l) => parts.push(format!("{} > {}", expr, l.to_sql_literal())),
                    Bound::Unbounded => {}
                }
                match upper {
                    Bound::Included(u) => parts.push(format!("{} <= {}", expr, u.to_sql_literal())),
                    Bound::Excluded(u) => parts.push(format!("{} < {}", expr, u.to_sql_literal())),
                    Bound::Unbounded => {}
                }
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join(" AND "))
                }
            }
        }
    }
}

// ============================================================================
// Predicate Set
// ============================================================================

/// Ordered per-column predicates shared by all segments of one batch
///
/// Equality is by value. Sets built for one batch are normally the same
/// allocation, so comparison first checks pointer identity as a shortcut.
#[derive(Debug, Clone)]
pub struct PredicateSet(Arc<[ColumnPredicate]>);

impl PredicateSet {
    /// Create a predicate set, one predicate per grouping column
    pub fn new(predicates: Vec<ColumnPredicate>) -> Self {
        Self(Arc::from(predicates))
    }

    /// A set of `n` unconstrained predicates
    pub fn unconstrained(n: usize) -> Self {
        Self::new(vec![ColumnPredicate::All; n])
    }

    /// Whether both sets share one allocation
    pub fn ptr_eq(&self, other: &PredicateSet) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Describe how `other` differs from `self`, or `None` if the shapes match
    pub fn shape_difference(&self, other: &PredicateSet) -> Option<String> {
        if self.ptr_eq(other) {
            return None;
        }
        if self.len() != other.len() {
            return Some(format!(
                "predicate count {} differs from reference count {}",
                other.len(),
                self.len()
            ));
        }
        self.iter()
            .zip(other.iter())
            .position(|(a, b)| a != b)
            .map(|i| {
                format!(
                    "predicate {} is {:?}, reference has {:?}",
                    i, other.0[i], self.0[i]
                )
            })
    }

    /// Select the predicates at the given positions, in order
    ///
    /// Used to derive the predicate shape of a coarser grouping. Every
    /// position must address a column of this set.
    pub fn project(&self, positions: &[usize]) -> Result<PredicateSet, PlanError> {
        let predicates = positions
            .iter()
            .map(|&i| {
                self.0.get(i).cloned().ok_or(PlanError::IndexOutOfRange {
                    what: "rollup columns",
                    index: i,
                    len: self.0.len(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PredicateSet::new(predicates))
    }
}

impl Deref for PredicateSet {
    type Target = [ColumnPredicate];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq for PredicateSet {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0[..] == other.0[..]
    }
}

impl Eq for PredicateSet {}

impl Hash for PredicateSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0[..].hash(state);
    }
}

impl From<Vec<ColumnPredicate>> for PredicateSet {
    fn from(predicates: Vec<ColumnPredicate>) -> Self {
        Self::new(predicates)
    }
}

// ============================================================================
// Compound Predicate
// ============================================================================

/// Constraint spanning one or more columns, applied to the whole query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CompoundPredicate {
    /// Single-column constraint
    Column {
        /// Constrained column
        column: Arc<Column>,
        /// Constraint on it
        predicate: ColumnPredicate,
    },
    /// Tuple membership: `(c1, c2) IN ((v11, v12), (v21, v22))`
    Tuples {
        /// Columns forming the tuple
        columns: Vec<Arc<Column>>,
        /// Allowed tuples, each as wide as `columns`
        tuples: Vec<Vec<Value>>,
    },
    /// All must hold
    And(Vec<CompoundPredicate>),
    /// Any must hold
    Or(Vec<CompoundPredicate>),
}

impl CompoundPredicate {
    /// Render as a SQL condition
    pub fn to_sql(&self) -> String {
        match self {
            CompoundPredicate::Column { column, predicate } => predicate
                .to_sql(&column.expr())
                .unwrap_or_else(|| "1 = 1".to_string()),
            CompoundPredicate::Tuples { columns, tuples } => {
                if tuples.is_empty() {
                    return "1 = 0".to_string();
                }
                let exprs: Vec<String> = columns.iter().map(|c| c.expr()).collect();
                let rows: Vec<String> = tuples
                    .iter()
                    .map(|t| {
                        let literals: Vec<String> = t.iter().map(Value::to_sql_literal).collect();
                        format!("({})", literals.join(", "))
                    })
                    .collect();
                format!("({}) IN ({})", exprs.join(", "), rows.join(", "))
            }
            CompoundPredicate::And(items) => Self::join(items, " AND ", "1 = 1"),
            CompoundPredicate::Or(items) => Self::join(items, " OR ", "1 = 0"),
        }
    }

    fn join(items: &[CompoundPredicate], separator: &str, empty: &str) -> String {
        match items {
            [] => empty.to_string(),
            [only] => only.to_sql(),
            _ => {
                let parts: Vec<String> = items.iter().map(CompoundPredicate::to_sql).collect();
                format!("({})", parts.join(separator))
            }
        }
    }

    /// Columns referenced anywhere in this predicate, in first-seen order
    pub fn columns(&self) -> Vec<Arc<Column>> {
        let mut out: Vec<Arc<Column>> = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<Arc<Column>>) {
        fn push(out: &mut Vec<Arc<Column>>, c: &Arc<Column>) {
            if !out.iter().any(|seen| seen == c) {
                out.push(Arc::clone(c));
            }
        }
        match self {
            CompoundPredicate::Column { column, .. } => push(out, column),
            CompoundPredicate::Tuples { columns, .. } => {
                for column in columns {
                    push(out, column);
                }
            }
            CompoundPredicate::And(items) | CompoundPredicate::Or(items) => {
                for item in items {
                    item.collect_columns(out);
                }
            }
        }
    }
}
