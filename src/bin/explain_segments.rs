//! Print the SQL a segment batch would be loaded with
//!
//! ```text
//! explain_segments --batch batch.toml [--config olap.toml]
//! ```
//!
//! The batch file describes the star, the grouping columns with their
//! predicates, the measures and optional rollups:
//!
//! ```toml
//! fact_table = "sales"
//! rollups = [[0]]
//!
//! [[links]]
//! table = "store"
//! foreign_key = "store_id"
//! primary_key = "id"
//!
//! [[columns]]
//! table = "store"
//! name = "region"
//! values = ["EU", "NA"]
//!
//! [[columns]]
//! table = "sales"
//! name = "year"
//!
//! [[measures]]
//! name = "Sales"
//! table = "sales"
//! column = "amount"
//! aggregator = "sum"
//! ```

use clap::Parser;
use kuba_olap::{
    config::{Config, LoggingConfig},
    error::{Error, PlanError, Result},
    loader::SegmentBatch,
    plan::{AggregateQuerySpec, GroupingSetsList},
    segment::{ColumnPredicate, PredicateSet, Segment},
    types::{Aggregator, Column, Measure, Star, Value},
};
use serde::Deserialize;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Command line arguments
#[derive(Parser)]
#[command(name = "explain_segments")]
#[command(about = "Show the SQL used to load a batch of segments", long_about = None)]
struct Cli {
    /// Batch description (TOML)
    #[arg(short, long)]
    batch: PathBuf,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

// =============================================================================
// Batch Description
// =============================================================================

#[derive(Debug, Deserialize)]
struct BatchFile {
    fact_table: String,
    #[serde(default)]
    links: Vec<LinkSpec>,
    columns: Vec<ColumnSpec>,
    measures: Vec<MeasureSpec>,
    #[serde(default)]
    rollups: Vec<Vec<usize>>,
}

#[derive(Debug, Deserialize)]
struct LinkSpec {
    table: String,
    foreign_key: String,
    primary_key: String,
}

#[derive(Debug, Deserialize)]
struct ColumnSpec {
    table: String,
    name: String,
    expression: Option<String>,
    /// Allowed members; absent means unconstrained
    values: Option<Vec<MemberSpec>>,
    /// Inclusive lower bound
    min: Option<MemberSpec>,
    /// Inclusive upper bound
    max: Option<MemberSpec>,
}

#[derive(Debug, Deserialize)]
struct MeasureSpec {
    name: String,
    table: String,
    column: Option<String>,
    aggregator: Aggregator,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum MemberSpec {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<MemberSpec> for Value {
    fn from(m: MemberSpec) -> Self {
        match m {
            MemberSpec::Bool(b) => Value::Bool(b),
            MemberSpec::Int(i) => Value::Int(i),
            MemberSpec::Str(s) => Value::str(s),
        }
    }
}

impl ColumnSpec {
    fn predicate(&self) -> ColumnPredicate {
        if let Some(values) = &self.values {
            return ColumnPredicate::values(values.iter().cloned().map(Value::from));
        }
        if self.min.is_none() && self.max.is_none() {
            return ColumnPredicate::All;
        }
        let bound = |m: &Option<MemberSpec>| match m {
            Some(v) => Bound::Included(Value::from(v.clone())),
            None => Bound::Unbounded,
        };
        ColumnPredicate::Range {
            lower: bound(&self.min),
            upper: bound(&self.max),
        }
    }
}

impl BatchFile {
    fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse batch file {}: {}", path.display(), e))
        })
    }

    fn into_batch(self) -> Result<SegmentBatch> {
        let mut star = Star::new(&self.fact_table);
        for link in &self.links {
            star = star.with_link(&link.table, &link.foreign_key, &link.primary_key);
        }
        let star = Arc::new(star);

        let columns: Vec<Arc<Column>> = self
            .columns
            .iter()
            .map(|c| {
                let column = Column::new(&c.table, &c.name);
                Arc::new(match &c.expression {
                    Some(e) => column.with_expression(e),
                    None => column,
                })
            })
            .collect();
        let predicates = PredicateSet::new(self.columns.iter().map(ColumnSpec::predicate).collect());
        let measures: Vec<Arc<Measure>> = self
            .measures
            .iter()
            .map(|m| Arc::new(Measure::new(&m.name, &m.table, m.column.as_deref(), m.aggregator)))
            .collect();

        let segments = Segment::batch(&star, &measures, &columns, &predicates)?;
        let mut batch = SegmentBatch::new(segments)?;
        for positions in &self.rollups {
            batch = batch.with_rollup(positions)?;
        }
        Ok(batch)
    }
}

// =============================================================================
// Explain
// =============================================================================

fn explain(batch: SegmentBatch, config: &Config) -> Result<Vec<String>> {
    let list = GroupingSetsList::new(batch.grouping_sets().to_vec())?;
    let measures = list.default_segments().len();
    if measures > config.loader.max_measures_per_query {
        return Err(PlanError::TooManyMeasures {
            count: measures,
            limit: config.loader.max_measures_per_query,
        }
        .into());
    }

    let specs = if config.loader.use_grouping_sets {
        vec![AggregateQuerySpec::new(list, None)?]
    } else {
        list.grouping_sets()
            .iter()
            .map(|set| {
                AggregateQuerySpec::new(GroupingSetsList::new(vec![set.clone()])?, None)
            })
            .collect::<std::result::Result<Vec<_>, PlanError>>()?
    };

    let mut statements = Vec::with_capacity(specs.len());
    for spec in &specs {
        let layout = spec.layout();
        debug!(
            columns = layout.columns,
            measures = layout.measures,
            indicators = layout.indicators,
            "Rendered segment statement"
        );
        statements.push(spec.to_sql()?);
    }
    Ok(statements)
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => Config::from_file_with_env(path)?,
        None => Config::from_env(),
    };
    config.validate()?;
    Ok(config)
}

fn init_logging(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.structured {
        builder.with_target(true).with_thread_ids(true).init();
    } else {
        builder.compact().with_target(false).init();
    }
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    let batch = BatchFile::load(&cli.batch)?.into_batch()?;
    info!(
        batch = %cli.batch.display(),
        segments = batch.segment_count(),
        grouping_sets = batch.grouping_sets().len(),
        "Explaining segment batch"
    );

    for statement in explain(batch, config)? {
        println!("{};", statement);
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };
    init_logging(&config.logging);

    if let Err(e) = run(&cli, &config) {
        error!(error = %e, "explain_segments failed");
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BATCH: &str = r#"
        fact_table = "sales"
        rollups = [[0]]

        [[links]]
        table = "store"
        foreign_key = "store_id"
        primary_key = "id"

        [[columns]]
        table = "store"
        name = "region"
        values = ["EU", "NA"]

        [[columns]]
        table = "sales"
        name = "year"

        [[measures]]
        name = "Sales"
        table = "sales"
        column = "amount"
        aggregator = "sum"

        [[measures]]
        name = "Rows"
        table = "sales"
        aggregator = "count"
    "#;

    #[test]
    fn test_explain_with_grouping_sets() {
        let file: BatchFile = toml::from_str(BATCH).unwrap();
        let statements = explain(file.into_batch().unwrap(), &Config::default()).unwrap();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("store.region IN ('EU', 'NA')"));
        assert!(statements[0].contains("GROUPING(sales.year) AS g0"));
        assert!(statements[0].contains("count(*) AS m1"));
    }

    #[test]
    fn test_explain_without_grouping_sets() {
        let file: BatchFile = toml::from_str(BATCH).unwrap();
        let mut config = Config::default();
        config.loader.use_grouping_sets = false;
        let statements = explain(file.into_batch().unwrap(), &config).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements.iter().all(|s| !s.contains("GROUPING")));
    }

    #[test]
    fn test_load_config_reads_logging_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("olap.toml");
        std::fs::write(&path, "[loader]\nuse_grouping_sets = false\n\n[logging]\nstructured = false\n").unwrap();

        let cli = Cli {
            batch: dir.path().join("batch.toml"),
            config: Some(path),
        };
        let config = load_config(&cli).unwrap();
        assert!(!config.loader.use_grouping_sets);
        assert!(!config.logging.structured);

        let cli = Cli {
            batch: dir.path().join("batch.toml"),
            config: Some(dir.path().join("missing.toml")),
        };
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn test_rollup_position_out_of_range() {
        let mut file: BatchFile = toml::from_str(BATCH).unwrap();
        file.rollups = vec![vec![5]];
        assert!(matches!(
            file.into_batch(),
            Err(Error::Plan(PlanError::IndexOutOfRange { index: 5, .. }))
        ));
    }
}
