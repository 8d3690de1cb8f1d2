//! Error types for segment planning, caching and loading

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Query plan construction error
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Waiting on the segment store failed
    #[error("Flight error: {0}")]
    Flight(#[from] FlightError),

    /// Executing or decoding a segment query failed
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(String),
}

/// Query plan construction errors
///
/// The invariant variants signal that the caller batched segments that do
/// not belong together. They are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A segment's predicate sequence differs from the reference segment
    #[error("Predicate shape mismatch in segment {segment}: {reason}")]
    PredicateShapeMismatch {
        /// Position of the offending segment within the batch
        segment: usize,
        /// What differed
        reason: String,
    },

    /// A segment whose column and predicate counts differ
    #[error("Segment has {columns} columns but {predicates} predicates")]
    ArityMismatch {
        /// Number of grouping columns
        columns: usize,
        /// Number of column predicates
        predicates: usize,
    },

    /// A batch or grouping set without segments
    #[error("Empty batch: {0}")]
    EmptyBatch(String),

    /// A coarser grouping set references a column the finest set lacks
    #[error("Grouping set {set} is not a subset of the finest grouping: column {column}")]
    GroupingSetNotSubset {
        /// Position of the grouping set
        set: usize,
        /// Column expression that is missing from the finest grouping
        column: String,
    },

    /// Grouping sets disagree on their measure sequence
    #[error("Grouping set {set} measures differ from the finest grouping: {reason}")]
    MeasureMismatch {
        /// Position of the grouping set
        set: usize,
        /// What differed
        reason: String,
    },

    /// A coarser grouping set's predicates disagree with the finest grouping
    #[error("Grouping set {set} cannot roll up column {column}: predicates differ from the finest grouping")]
    RollupPredicateMismatch {
        /// Position of the grouping set
        set: usize,
        /// Column expression whose predicate differs or is constrained
        column: String,
    },

    /// Positional accessor called past the end
    #[error("Index {index} out of range for {what} (len {len})")]
    IndexOutOfRange {
        /// Accessor family
        what: &'static str,
        /// Requested index
        index: usize,
        /// Number of elements available
        len: usize,
    },

    /// More measures in one batch than the loader allows
    #[error("Too many measures in one query: {count} exceeds limit of {limit}")]
    TooManyMeasures {
        /// Measures requested
        count: usize,
        /// Configured limit
        limit: usize,
    },
}

impl PlanError {
    /// Whether this error indicates segments were batched incorrectly
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            PlanError::PredicateShapeMismatch { .. }
                | PlanError::ArityMismatch { .. }
                | PlanError::GroupingSetNotSubset { .. }
                | PlanError::MeasureMismatch { .. }
                | PlanError::RollupPredicateMismatch { .. }
        )
    }
}

/// Errors observed by callers waiting on the single-flight store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlightError {
    /// The waiting caller was cancelled before a value was published
    #[error("Cancelled while waiting")]
    Cancelled,

    /// The bounded wait elapsed before a value was published
    #[error("Timed out after {0:?}")]
    TimedOut(Duration),

    /// The caller computing the value reported a failure
    #[error("Upstream computation failed: {0}")]
    UpstreamFailed(Arc<str>),

    /// The caller computing the value went away without publishing
    #[error("Claim abandoned before publication")]
    ClaimAbandoned,
}

/// Errors raised while executing a segment query or decoding its rows
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The SQL collaborator rejected or failed the statement
    #[error("SQL execution failed: {0}")]
    Sql(String),

    /// A result row could not be mapped back onto segments
    #[error("Decode failed: {0}")]
    Decode(String),
}

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::from(PlanError::PredicateShapeMismatch {
            segment: 2,
            reason: "length 3 != 2".to_string(),
        });
        let display = format!("{}", err);
        assert!(display.contains("Planning error"));
        assert!(display.contains("segment 2"));
    }

    #[test]
    fn test_invariant_classification() {
        assert!(PlanError::PredicateShapeMismatch {
            segment: 1,
            reason: String::new(),
        }
        .is_invariant_violation());
        assert!(!PlanError::TooManyMeasures { count: 3, limit: 2 }.is_invariant_violation());
        assert!(!PlanError::EmptyBatch("x".into()).is_invariant_violation());
    }

    #[test]
    fn test_flight_error_is_distinguishable() {
        let cancelled = FlightError::Cancelled;
        let timed_out = FlightError::TimedOut(Duration::from_millis(5));
        assert_ne!(cancelled, timed_out);
        assert!(format!("{}", timed_out).contains("5ms"));
    }
}
