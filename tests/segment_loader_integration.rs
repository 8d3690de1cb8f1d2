//! End-to-end tests for the segment loader
//!
//! A counting fake executor stands in for the database. It answers any
//! statement over the `(region, year)` fixture according to the statement's
//! result layout, so the tests can check how many statements ran and what
//! got published.

use kuba_olap::config::Config;
use kuba_olap::error::{Error, ExecutionError, FlightError, PlanError};
use kuba_olap::flight::CancellationToken;
use kuba_olap::loader::{ResultSet, SegmentBatch, SegmentExecutor, SegmentLoader};
use kuba_olap::metrics::gather_metrics;
use kuba_olap::plan::{ResultLayout, SqlStatement, StatementPurpose};
use kuba_olap::segment::{ColumnPredicate, CompoundPredicate, PredicateSet, Segment};
use kuba_olap::types::{Aggregator, Column, Datum, Measure, Star, Value};
use parking_lot::Mutex;
use prometheus::Registry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

// ============================================================================
// Fixtures
// ============================================================================

struct CountingExecutor {
    calls: AtomicUsize,
    delay: Duration,
    fail_with: Option<String>,
    statements: Mutex<Vec<SqlStatement>>,
}

impl CountingExecutor {
    fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
            fail_with: None,
            statements: Mutex::new(Vec::new()),
        }
    }

    fn failing(delay: Duration, message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::with_delay(delay)
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn sql(&self) -> Vec<String> {
        self.statements.lock().iter().map(|s| s.sql.clone()).collect()
    }
}

impl SegmentExecutor for CountingExecutor {
    fn execute(&self, statement: &SqlStatement) -> Result<ResultSet, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.statements.lock().push(statement.clone());
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        match &self.fail_with {
            Some(message) => Err(ExecutionError::Sql(message.clone())),
            None => Ok(respond(statement.layout)),
        }
    }
}

/// Rows of the `(region, year)` fixture for a given layout
fn respond(layout: ResultLayout) -> ResultSet {
    let finest = [("EU", 2023, 1.0), ("EU", 2024, 2.0), ("NA", 2024, 4.0)];
    let by_region = [("EU", 3.0), ("NA", 4.0)];
    let measures = |v: f64| (0..layout.measures).map(move |m| Datum::Float(v * (m + 1) as f64));

    let mut rows = Vec::new();
    match (layout.columns, layout.indicators) {
        (2, indicators) => {
            for (region, year, v) in finest {
                let mut row = vec![Datum::Str(region.into()), Datum::Int(year)];
                row.extend(measures(v));
                if indicators == 1 {
                    row.push(Datum::Int(0));
                }
                rows.push(row);
            }
            if indicators == 1 {
                for (region, v) in by_region {
                    let mut row = vec![Datum::Str(region.into()), Datum::Null];
                    row.extend(measures(v));
                    row.push(Datum::Int(1));
                    rows.push(row);
                }
            }
        }
        (1, _) => {
            for (region, v) in by_region {
                let mut row = vec![Datum::Str(region.into())];
                row.extend(measures(v));
                rows.push(row);
            }
        }
        other => panic!("unexpected layout {:?}", other),
    }
    ResultSet::from_rows(rows)
}

fn finest_segments() -> Vec<Arc<Segment>> {
    let star = Arc::new(Star::new("sales").with_link("store", "store_id", "id"));
    let columns = vec![
        Arc::new(Column::new("store", "region")),
        Arc::new(Column::new("sales", "year")),
    ];
    let measures = vec![
        Arc::new(Measure::new("Sales", "sales", Some("amount"), Aggregator::Sum)),
        Arc::new(Measure::new("Customers", "sales", Some("customer_id"), Aggregator::DistinctCount)),
    ];
    Segment::batch(&star, &measures, &columns, &PredicateSet::unconstrained(2)).unwrap()
}

fn batch() -> SegmentBatch {
    SegmentBatch::new(finest_segments()).unwrap()
}

fn rollup_batch() -> SegmentBatch {
    batch().with_rollup(&[0]).unwrap()
}

fn loader_with(executor: Arc<CountingExecutor>, config: Config) -> Arc<SegmentLoader> {
    SegmentLoader::builder()
        .with_config(config)
        .with_executor_arc(executor)
        .build()
        .unwrap()
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_concurrent_loads_execute_once() {
    let executor = Arc::new(CountingExecutor::with_delay(Duration::from_millis(100)));
    let loader = loader_with(Arc::clone(&executor), Config::default());

    // the first loader claims every segment before the others arrive
    let first = {
        let loader = Arc::clone(&loader);
        thread::spawn(move || loader.load(batch()).expect("load succeeds"))
    };
    thread::sleep(Duration::from_millis(20));

    let barrier = Arc::new(Barrier::new(7));
    let followers: Vec<_> = (0..7)
        .map(|_| {
            let loader = Arc::clone(&loader);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                loader.load(batch()).expect("load succeeds")
            })
        })
        .collect();

    let leader = first.join().expect("loader thread panicked");
    for handle in followers {
        let loaded = handle.join().expect("loader thread panicked");
        assert_eq!(loaded.len(), 2);
        assert!(Arc::ptr_eq(&loaded[0], &leader[0]));
        assert!(Arc::ptr_eq(&loaded[1], &leader[1]));
    }

    assert_eq!(executor.calls(), 1);
    let stats = loader.stats().snapshot();
    assert_eq!(stats.statements, 1);
    assert_eq!(stats.loaded, 2);
    assert_eq!(stats.joined, 14);
    assert_eq!(stats.hits, 0);
}

#[test]
fn test_rollup_loaded_in_one_statement() {
    let executor = Arc::new(CountingExecutor::new());
    let loader = loader_with(Arc::clone(&executor), Config::default());

    let loaded = loader.load(rollup_batch()).unwrap();
    assert_eq!(loaded.len(), 4);
    assert_eq!(executor.calls(), 1);

    let sql = executor.sql()[0].clone();
    assert!(sql.contains("GROUP BY GROUPING SETS ((c0, c1), (c0))"), "{}", sql);
    assert!(sql.contains("GROUPING(sales.year) AS g0"));

    // finest: Sales, Customers; rollup: Sales, Customers
    assert_eq!(loaded[0].data.len(), 3);
    assert_eq!(
        loaded[0].data.get(&[Value::str("EU"), Value::Int(2024)]),
        Some(&Datum::Float(2.0))
    );
    assert_eq!(loaded[2].data.arity(), 1);
    assert_eq!(loaded[2].data.get(&[Value::str("EU")]), Some(&Datum::Float(3.0)));
    assert_eq!(loaded[3].data.get(&[Value::str("NA")]), Some(&Datum::Float(8.0)));
    assert_eq!(
        executor.statements.lock()[0].purpose,
        StatementPurpose::CellSegment
    );
}

#[test]
fn test_one_statement_per_grouping_set_when_disabled() {
    let executor = Arc::new(CountingExecutor::new());
    let mut config = Config::default();
    config.loader.use_grouping_sets = false;
    let loader = loader_with(Arc::clone(&executor), config);

    let loaded = loader.load(rollup_batch()).unwrap();
    assert_eq!(loaded.len(), 4);
    assert_eq!(executor.calls(), 2);
    assert!(executor.sql().iter().all(|sql| !sql.contains("GROUPING")));
    assert_eq!(loaded[2].data.get(&[Value::str("NA")]), Some(&Datum::Float(4.0)));

    let ids: Vec<u64> = executor.statements.lock().iter().map(|s| s.id).collect();
    assert!(ids[0] < ids[1]);
}

#[test]
fn test_cached_finest_set_loads_only_rollup() {
    let executor = Arc::new(CountingExecutor::new());
    let loader = loader_with(Arc::clone(&executor), Config::default());

    loader.load(batch()).unwrap();
    let loaded = loader.load(rollup_batch()).unwrap();

    assert_eq!(executor.calls(), 2);
    let second = executor.sql()[1].clone();
    assert!(!second.contains("GROUPING"), "{}", second);
    assert!(second.contains("GROUP BY store.region"));
    assert_eq!(loaded[2].data.len(), 2);
    assert_eq!(loader.stats().snapshot().hits, 2);
}

fn region_constraint(values: &[&str]) -> Vec<CompoundPredicate> {
    vec![CompoundPredicate::Column {
        column: Arc::clone(&finest_segments()[0].columns()[0]),
        predicate: ColumnPredicate::values(values.iter().map(Value::str)),
    }]
}

#[test]
fn test_compound_predicates_reach_statement() {
    let executor = Arc::new(CountingExecutor::new());
    let loader = loader_with(Arc::clone(&executor), Config::default());

    let batch = batch().with_compound_predicates(region_constraint(&["EU", "NA"]));
    loader.load(batch).unwrap();
    assert!(executor.sql()[0].contains("WHERE sales.store_id = store.id AND store.region IN ('EU', 'NA')"));
}

#[test]
fn test_compound_constraint_is_part_of_segment_identity() {
    let executor = Arc::new(CountingExecutor::new());
    let loader = loader_with(Arc::clone(&executor), Config::default());

    let eu = loader
        .load(batch().with_compound_predicates(region_constraint(&["EU"])))
        .unwrap();
    let na = loader
        .load(batch().with_compound_predicates(region_constraint(&["NA"])))
        .unwrap();

    assert_eq!(executor.calls(), 2);
    assert!(executor.sql()[0].contains("store.region = 'EU'"));
    assert!(executor.sql()[1].contains("store.region = 'NA'"));
    assert!(!Arc::ptr_eq(&eu[0], &na[0]));
    assert_ne!(eu[0].key(), na[0].key());

    // neither constrained load is served to an unconstrained request
    loader.load(batch()).unwrap();
    assert_eq!(executor.calls(), 3);

    // repeating a constraint is a cache hit
    let again = loader
        .load(batch().with_compound_predicates(region_constraint(&["EU"])))
        .unwrap();
    assert!(Arc::ptr_eq(&eu[0], &again[0]));
    assert_eq!(executor.calls(), 3);
}

#[test]
fn test_rollup_position_out_of_range_rejected() {
    let err = batch().with_rollup(&[0, 7]).unwrap_err();
    assert_eq!(
        err,
        PlanError::IndexOutOfRange {
            what: "rollup columns",
            index: 7,
            len: 2
        }
    );
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_failure_broadcast_to_concurrent_loader() {
    let executor = Arc::new(CountingExecutor::failing(Duration::from_millis(80), "disk full"));
    let loader = loader_with(Arc::clone(&executor), Config::default());

    let first = {
        let loader = Arc::clone(&loader);
        thread::spawn(move || loader.load(batch()))
    };
    thread::sleep(Duration::from_millis(20));
    let second = loader.load(batch());

    let first = first.join().expect("loader thread panicked");
    assert!(matches!(first, Err(Error::Execution(ExecutionError::Sql(_)))));
    match second {
        Err(Error::Flight(FlightError::UpstreamFailed(msg))) => assert!(msg.contains("disk full")),
        other => panic!("unexpected {:?}", other.map(|v| v.len())),
    }
    assert_eq!(executor.calls(), 1);
}

#[test]
fn test_wait_timeout_from_config() {
    let slow = Arc::new(CountingExecutor::with_delay(Duration::from_millis(300)));
    let loader = loader_with(Arc::clone(&slow), Config::default());

    let mut config = Config::default();
    config.store.wait_timeout_ms = Some(50);
    let impatient = SegmentLoader::builder()
        .with_config(config)
        .with_executor(CountingExecutor::new())
        .with_store(Arc::clone(loader.store()))
        .build()
        .unwrap();

    let background = {
        let loader = Arc::clone(&loader);
        thread::spawn(move || loader.load(batch()))
    };
    thread::sleep(Duration::from_millis(30));

    let result = impatient.load(batch());
    assert!(matches!(
        result,
        Err(Error::Flight(FlightError::TimedOut(_)))
    ));
    assert!(background.join().expect("loader thread panicked").is_ok());
}

#[test]
fn test_cancelled_load() {
    let slow = Arc::new(CountingExecutor::with_delay(Duration::from_millis(300)));
    let loader = loader_with(Arc::clone(&slow), Config::default());
    let token = CancellationToken::new();

    let background = {
        let loader = Arc::clone(&loader);
        thread::spawn(move || loader.load(batch()))
    };
    thread::sleep(Duration::from_millis(30));

    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            token.cancel();
        })
    };
    let result = loader.load_cancellable(batch(), &token);
    canceller.join().expect("canceller panicked");

    assert!(matches!(result, Err(Error::Flight(FlightError::Cancelled))));
    assert!(background.join().expect("loader thread panicked").is_ok());
    assert_eq!(slow.calls(), 1);
}

// ============================================================================
// Metrics
// ============================================================================

#[test]
fn test_metrics_recorded_on_registry() {
    let registry = Registry::new();
    let loader = SegmentLoader::builder()
        .with_executor(CountingExecutor::new())
        .with_metrics_registry(&registry)
        .build()
        .unwrap();

    loader.load(batch()).unwrap();
    loader.load(batch()).unwrap();

    let text = gather_metrics(&registry).unwrap();
    assert!(text.contains("segment_load_queries_total 1"));
    assert!(text.contains("segment_loads_total{outcome=\"loaded\"} 2"));
    assert!(text.contains("segment_cache_hits_total 2"));
}
