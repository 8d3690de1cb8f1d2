//! Core data types shared by the planner, the store and the loader
//!
//! # Key Types
//!
//! - **`Value`**: A dimension value (hashable, usable in predicates and cell keys)
//! - **`Datum`**: A raw value from a result row (may be a float measure)
//! - **`Column`**: A column of the star schema, identified by table and name
//! - **`Measure`**: An aggregated fact column (`sum(sales.amount)`)
//! - **`Star`**: The fact table plus the join links to its dimension tables
//!
//! # Example
//!
//! ```rust
//! use kuba_olap::types::{Aggregator, Column, Measure, Star};
//!
//! let star = Star::new("sales").with_link("store", "store_id", "id");
//! let region = Column::new("store", "region");
//! let amount = Measure::new("Sales", "sales", Some("amount"), Aggregator::Sum);
//!
//! assert_eq!(region.expr(), "store.region");
//! assert_eq!(amount.aggregate_expr(), "sum(sales.amount)");
//! assert_eq!(star.join_condition("store").as_deref(), Some("sales.store_id = store.id"));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A dimension value
///
/// Floats are deliberately absent: dimension members must have structural
/// equality and a stable hash so they can appear in predicates and segment
/// keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean member
    Bool(bool),
    /// Integer member
    Int(i64),
    /// String member
    Str(Arc<str>),
}

impl Value {
    /// Create a string value
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// Check for SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Render as a SQL literal, quoting and escaping strings
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            Value::Int(i) => i.to_string(),
            Value::Str(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "#null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// A raw value as returned by the SQL execution collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// String
    Str(Arc<str>),
}

impl Datum {
    /// Convert to a dimension value; floats have no dimension form
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Datum::Null => Some(Value::Null),
            Datum::Bool(b) => Some(Value::Bool(*b)),
            Datum::Int(i) => Some(Value::Int(*i)),
            Datum::Float(_) => None,
            Datum::Str(s) => Some(Value::Str(Arc::clone(s))),
        }
    }

    /// Numeric view, used for measure cells
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Int(i) => Some(*i as f64),
            Datum::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Interpret a grouping indicator (`GROUPING(expr)` yields 0 or 1)
    pub fn as_grouping_bit(&self) -> Option<bool> {
        match self {
            Datum::Int(0) | Datum::Bool(false) => Some(false),
            Datum::Int(1) | Datum::Bool(true) => Some(true),
            _ => None,
        }
    }
}

impl From<Value> for Datum {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Datum::Null,
            Value::Bool(b) => Datum::Bool(b),
            Value::Int(i) => Datum::Int(i),
            Value::Str(s) => Datum::Str(s),
        }
    }
}

/// A column of the star schema
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    /// Table the column lives in
    pub table: Arc<str>,
    /// Column name
    pub name: Arc<str>,
    /// Optional SQL expression replacing `table.name`
    pub expression: Option<Arc<str>>,
}

impl Column {
    /// Create a plain column reference
    pub fn new(table: &str, name: &str) -> Self {
        Self {
            table: Arc::from(table),
            name: Arc::from(name),
            expression: None,
        }
    }

    /// Replace the column reference with a computed expression
    pub fn with_expression(mut self, expression: &str) -> Self {
        self.expression = Some(Arc::from(expression));
        self
    }

    /// SQL expression that produces this column
    pub fn expr(&self) -> String {
        match &self.expression {
            Some(e) => e.to_string(),
            None => format!("{}.{}", self.table, self.name),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.name)
    }
}

/// Aggregation function applied to a measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregator {
    /// Sum of values
    Sum,
    /// Row count (or non-null count when a column is given)
    Count,
    /// Count of distinct values
    DistinctCount,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Arithmetic mean
    Avg,
}

impl Aggregator {
    /// SQL function name
    pub fn name(&self) -> &'static str {
        match self {
            Aggregator::Sum => "sum",
            Aggregator::Count | Aggregator::DistinctCount => "count",
            Aggregator::Min => "min",
            Aggregator::Max => "max",
            Aggregator::Avg => "avg",
        }
    }
}

/// A measure: an aggregator over a fact column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Measure {
    /// Measure name, unique within the star
    pub name: Arc<str>,
    /// Table holding the aggregated column
    pub table: Arc<str>,
    /// Aggregated column; `None` means `count(*)`
    pub column: Option<Arc<str>>,
    /// Aggregation function
    pub aggregator: Aggregator,
}

impl Measure {
    /// Create a measure
    pub fn new(name: &str, table: &str, column: Option<&str>, aggregator: Aggregator) -> Self {
        Self {
            name: Arc::from(name),
            table: Arc::from(table),
            column: column.map(Arc::from),
            aggregator,
        }
    }

    /// SQL expression computing this measure, e.g. `sum(sales.amount)`
    pub fn aggregate_expr(&self) -> String {
        let arg = match &self.column {
            Some(c) => format!("{}.{}", self.table, c),
            None => "*".to_string(),
        };
        match self.aggregator {
            Aggregator::DistinctCount => format!("count(distinct {})", arg),
            agg => format!("{}({})", agg.name(), arg),
        }
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Measures].[{}]", self.name)
    }
}

/// Join link from the fact table to one dimension table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimensionLink {
    /// Dimension table name
    pub table: Arc<str>,
    /// Foreign key column on the fact table
    pub foreign_key: Arc<str>,
    /// Primary key column on the dimension table
    pub primary_key: Arc<str>,
}

/// A star schema: one fact table joined to dimension tables
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Star {
    /// Fact table name
    pub fact_table: Arc<str>,
    /// Dimension links
    pub links: Vec<DimensionLink>,
}

impl Star {
    /// Create a star over a fact table with no dimension links
    pub fn new(fact_table: &str) -> Self {
        Self {
            fact_table: Arc::from(fact_table),
            links: Vec::new(),
        }
    }

    /// Add a dimension link
    pub fn with_link(mut self, table: &str, foreign_key: &str, primary_key: &str) -> Self {
        self.links.push(DimensionLink {
            table: Arc::from(table),
            foreign_key: Arc::from(foreign_key),
            primary_key: Arc::from(primary_key),
        });
        self
    }

    /// Join condition connecting `table` to the fact table
    ///
    /// Returns `None` for the fact table itself and for unknown tables.
    pub fn join_condition(&self, table: &str) -> Option<String> {
        if table == &*self.fact_table {
            return None;
        }
        self.links
            .iter()
            .find(|link| &*link.table == table)
            .map(|link| {
                format!(
                    "{}.{} = {}.{}",
                    self.fact_table, link.foreign_key, link.table, link.primary_key
                )
            })
    }
}
