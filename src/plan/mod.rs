//! Query planning for segment loads
//!
//! Turns a batch of same-shape segments (plus optional rollups) into one
//! aggregate SQL statement whose result columns are addressed by position.
//!
//! ```text
//! Vec<GroupingSet> ──► GroupingSetsList ──► AggregateQuerySpec ──► QueryBuilder ──► SQL
//!   (finest first)      rollup columns       shape check            (SqlQuery)
//!                       subset/measure check  m<i>/c<i> aliases
//! ```

pub mod grouping_sets;
pub mod query_spec;
pub mod sql;

pub use grouping_sets::{GroupingSet, GroupingSetsList};
pub use query_spec::{validate_shape, AggregateQuerySpec, QuerySpec};
pub use sql::{QueryBuilder, ResultLayout, SqlQuery, SqlStatement, StatementPurpose};
