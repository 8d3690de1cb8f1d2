//! SQL assembly for segment queries
//!
//! [`QueryBuilder`] is the seam a [`QuerySpec`](super::QuerySpec) writes
//! into; [`SqlQuery`] is the ANSI-shaped reference implementation. The
//! rendered text and the positional layout of its result columns travel
//! together as a [`SqlStatement`].
//!
//! ```text
//! SELECT c0..cn, m0..mk, g0..gr
//! FROM   fact, dim1, dim2            (dimension tables joined by the star links)
//! WHERE  join conditions AND predicates
//! GROUP BY exprs | GROUP BY GROUPING SETS ((..), (..))
//! ```

use crate::types::Star;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Builder Seam
// ============================================================================

/// Sink for the clauses of one aggregate query
pub trait QueryBuilder {
    /// Add a table to the FROM list (joined to the fact table if needed)
    fn add_from(&mut self, table: &str);

    /// Add a WHERE condition, ANDed with the others
    fn add_where(&mut self, condition: String);

    /// Select `expression AS alias`, returning the alias to reference it by
    fn add_select(&mut self, expression: &str, alias: &str) -> String;

    /// Add an expression to the plain GROUP BY list
    fn add_group_by(&mut self, expression: &str);

    /// Add one grouping set; items are aliases or raw expressions
    fn add_grouping_set(&mut self, items: Vec<String>);

    /// Select `GROUPING(expression)`, returning its alias
    fn add_grouping_function(&mut self, expression: &str) -> String;
}

// ============================================================================
// Reference Renderer
// ============================================================================

/// Reference SQL renderer over a star schema
#[derive(Debug, Clone)]
pub struct SqlQuery {
    star: Arc<Star>,
    select: Vec<(String, String)>,
    from: Vec<String>,
    joins: Vec<String>,
    conditions: Vec<String>,
    group_by: Vec<String>,
    grouping_sets: Vec<Vec<String>>,
    grouping_functions: usize,
}

impl SqlQuery {
    /// Start a query whose FROM list holds the fact table
    pub fn new(star: Arc<Star>) -> Self {
        let fact = star.fact_table.to_string();
        Self {
            star,
            select: Vec::new(),
            from: vec![fact],
            joins: Vec::new(),
            conditions: Vec::new(),
            group_by: Vec::new(),
            grouping_sets: Vec::new(),
            grouping_functions: 0,
        }
    }

    /// Number of selected result columns
    pub fn select_count(&self) -> usize {
        self.select.len()
    }

    /// Render the statement text
    pub fn to_sql(&self) -> String {
        self.to_string()
    }
}

impl QueryBuilder for SqlQuery {
    fn add_from(&mut self, table: &str) {
        if self.from.iter().any(|t| t == table) {
            return;
        }
        self.from.push(table.to_string());
        if let Some(condition) = self.star.join_condition(table) {
            self.joins.push(condition);
        }
    }

    fn add_where(&mut self, condition: String) {
        if !self.conditions.contains(&condition) {
            self.conditions.push(condition);
        }
    }

    fn add_select(&mut self, expression: &str, alias: &str) -> String {
        self.select.push((expression.to_string(), alias.to_string()));
        alias.to_string()
    }

    fn add_group_by(&mut self, expression: &str) {
        self.group_by.push(expression.to_string());
    }

    fn add_grouping_set(&mut self, items: Vec<String>) {
        self.grouping_sets.push(items);
    }

    fn add_grouping_function(&mut self, expression: &str) -> String {
        let alias = format!("g{}", self.grouping_functions);
        self.grouping_functions += 1;
        self.add_select(&format!("GROUPING({})", expression), &alias)
    }
}

impl fmt::Display for SqlQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        for (i, (expression, alias)) in self.select.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} AS {}", expression, alias)?;
        }

        write!(f, " FROM {}", self.from.join(", "))?;

        let conditions: Vec<&str> = self
            .joins
            .iter()
            .chain(self.conditions.iter())
            .map(String::as_str)
            .collect();
        if !conditions.is_empty() {
            write!(f, " WHERE {}", conditions.join(" AND "))?;
        }

        if !self.grouping_sets.is_empty() {
            let sets: Vec<String> = self
                .grouping_sets
                .iter()
                .map(|set| format!("({})", set.join(", ")))
                .collect();
            write!(f, " GROUP BY GROUPING SETS ({})", sets.join(", "))?;
        } else if !self.group_by.is_empty() {
            write!(f, " GROUP BY {}", self.group_by.join(", "))?;
        }
        Ok(())
    }
}

// ============================================================================
// Statements
// ============================================================================

/// Why a statement is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementPurpose {
    /// Loading cell segments
    CellSegment,
    /// Reading member tuples
    Tuples,
    /// Drill-through to fact rows
    DrillThrough,
    /// Anything else
    Other,
}

impl StatementPurpose {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementPurpose::CellSegment => "cell_segment",
            StatementPurpose::Tuples => "tuples",
            StatementPurpose::DrillThrough => "drill_through",
            StatementPurpose::Other => "other",
        }
    }
}

impl fmt::Display for StatementPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Positions of the result columns of a segment query
///
/// Rows carry the grouping columns first, then the measures, then the
/// grouping indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultLayout {
    /// Number of `c<i>` columns
    pub columns: usize,
    /// Number of `m<i>` columns
    pub measures: usize,
    /// Number of `g<i>` columns
    pub indicators: usize,
}

impl ResultLayout {
    /// Expected row width
    pub fn width(&self) -> usize {
        self.columns + self.measures + self.indicators
    }

    /// Row position of measure `i`
    pub fn measure_index(&self, i: usize) -> usize {
        self.columns + i
    }

    /// Row position of grouping indicator `i`
    pub fn indicator_index(&self, i: usize) -> usize {
        self.columns + self.measures + i
    }
}

/// A rendered statement ready for the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatement {
    /// Process-unique, increasing id
    pub id: u64,
    /// Why it runs
    pub purpose: StatementPurpose,
    /// Statement text
    pub sql: String,
    /// Layout of the rows it returns
    pub layout: ResultLayout,
}

impl fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} #{}] {}", self.purpose, self.id, self.sql)
    }
}
