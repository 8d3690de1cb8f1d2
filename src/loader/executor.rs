//! The SQL execution seam
//!
//! The loader never talks to a database itself. It hands each rendered
//! [`SqlStatement`] to a [`SegmentExecutor`] and receives the rows back as
//! a [`ResultSet`] whose columns follow the statement's
//! [`ResultLayout`](crate::plan::ResultLayout).

use crate::error::ExecutionError;
use crate::plan::SqlStatement;
use crate::types::Datum;

/// Rows returned for one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column labels, if the executor reports them (`c0`, `m0`, `g0`, ...)
    pub columns: Vec<String>,
    /// Row values in select-list order
    pub rows: Vec<Vec<Datum>>,
}

impl ResultSet {
    /// Create a result set without column labels
    pub fn from_rows(rows: Vec<Vec<Datum>>) -> Self {
        Self {
            columns: Vec::new(),
            rows,
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Runs segment statements against the underlying database
///
/// Implementations are shared between loading threads.
pub trait SegmentExecutor: Send + Sync {
    /// Execute a statement and return all of its rows
    fn execute(&self, statement: &SqlStatement) -> Result<ResultSet, ExecutionError>;
}

impl<F> SegmentExecutor for F
where
    F: Fn(&SqlStatement) -> Result<ResultSet, ExecutionError> + Send + Sync,
{
    fn execute(&self, statement: &SqlStatement) -> Result<ResultSet, ExecutionError> {
        self(statement)
    }
}
