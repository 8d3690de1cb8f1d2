//! Segment loading through the single-flight store
//!
//! A [`SegmentLoader`] takes a [`SegmentBatch`] (one finest grouping set,
//! optionally with coarser rollups), elects itself loader for every segment
//! nobody else is loading, runs the fewest statements that cover those
//! segments and publishes the results. Segments another caller is already
//! loading are waited on instead of being queried twice.
//!
//! ```text
//!  load(batch)
//!    │
//!    ├─ validate ── AggregateQuerySpec::new (shape, subsets, measures)
//!    │
//!    ├─ try_claim every segment key
//!    │     Present ──► hit
//!    │     Claimed ──► needs loading (its grouping set joins the query)
//!    │     InFlight ─► wait afterwards
//!    │
//!    ├─ execute ── one GROUPING SETS statement, or one per grouping set
//!    │     ok  ──► decode, publish claimed segments
//!    │     err ──► fail every claim (waiters see UpstreamFailed)
//!    │
//!    └─ wait for in-flight segments, return in batch order
//! ```

pub mod decode;
pub mod executor;

pub use decode::decode_result;
pub use executor::{ResultSet, SegmentExecutor};

use crate::config::Config;
use crate::error::{Error, PlanError, Result};
use crate::flight::{CancellationToken, Claim, ClaimGuard, SingleFlightStore};
use crate::metrics::{LoadOutcome, SegmentMetrics};
use crate::plan::{
    AggregateQuerySpec, GroupingSet, GroupingSetsList, SqlStatement, StatementPurpose,
};
use crate::segment::{CompoundPredicate, LoadedSegment, Segment, SegmentData, SegmentKey};
use prometheus::Registry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Store of published segments
pub type SegmentStore = SingleFlightStore<SegmentKey, Arc<LoadedSegment>>;

static NEXT_STATEMENT_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Batch
// ============================================================================

/// Segments to load together
///
/// A compound constraint is stamped onto every segment of the batch, so it
/// takes part in the store key as well as in the WHERE clause.
#[derive(Debug, Clone)]
pub struct SegmentBatch {
    grouping_sets: Vec<GroupingSet>,
}

impl SegmentBatch {
    /// Batch of same-shape segments with no rollups
    pub fn new(segments: Vec<Arc<Segment>>) -> std::result::Result<Self, PlanError> {
        Ok(Self {
            grouping_sets: vec![GroupingSet::new(segments)?],
        })
    }

    /// Batch from explicit grouping sets, finest first
    pub fn from_grouping_sets(grouping_sets: Vec<GroupingSet>) -> Self {
        Self { grouping_sets }
    }

    /// Add a coarser grouping set derived from the finest one by keeping
    /// the columns at `positions`
    pub fn with_rollup(mut self, positions: &[usize]) -> std::result::Result<Self, PlanError> {
        let finest = self
            .grouping_sets
            .first()
            .ok_or_else(|| PlanError::EmptyBatch("no finest grouping set".into()))?;
        let rollup = finest
            .segments()
            .iter()
            .map(|s| s.rollup(positions).map(Arc::new))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.grouping_sets.push(GroupingSet::new(rollup)?);
        Ok(self)
    }

    /// Constrain every segment by a compound predicate list, replacing the
    /// per-column WHERE conditions
    pub fn with_compound_predicates(mut self, predicates: Vec<CompoundPredicate>) -> Self {
        let compound: Arc<[CompoundPredicate]> = Arc::from(predicates);
        self.grouping_sets = self
            .grouping_sets
            .iter()
            .map(|set| set.with_compound_predicates(&compound))
            .collect();
        self
    }

    /// Grouping sets, finest first
    pub fn grouping_sets(&self) -> &[GroupingSet] {
        &self.grouping_sets
    }

    /// Number of segments across all grouping sets
    pub fn segment_count(&self) -> usize {
        self.grouping_sets.iter().map(|s| s.segments().len()).sum()
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Loader statistics
#[derive(Debug, Default)]
pub struct LoaderStats {
    statements: AtomicU64,
    loaded: AtomicU64,
    joined: AtomicU64,
    hits: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`LoaderStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoaderStatsSnapshot {
    /// Statements executed
    pub statements: u64,
    /// Segments loaded and published by this loader
    pub loaded: u64,
    /// Segments obtained by waiting on another caller
    pub joined: u64,
    /// Segments already present
    pub hits: u64,
    /// Failed loads or waits
    pub failures: u64,
}

impl LoaderStats {
    /// Take a snapshot
    pub fn snapshot(&self) -> LoaderStatsSnapshot {
        LoaderStatsSnapshot {
            statements: self.statements.load(Ordering::Relaxed),
            loaded: self.loaded.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`SegmentLoader`]
#[derive(Default)]
pub struct SegmentLoaderBuilder {
    config: Config,
    executor: Option<Arc<dyn SegmentExecutor>>,
    store: Option<Arc<SegmentStore>>,
    registry: Option<Registry>,
}

impl SegmentLoaderBuilder {
    /// Set configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the statement executor
    pub fn with_executor<E>(mut self, executor: E) -> Self
    where
        E: SegmentExecutor + 'static,
    {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Set the statement executor from an existing Arc
    pub fn with_executor_arc(mut self, executor: Arc<dyn SegmentExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Share an existing store instead of creating one
    pub fn with_store(mut self, store: Arc<SegmentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register metrics on `registry`
    pub fn with_metrics_registry(mut self, registry: &Registry) -> Self {
        self.registry = Some(registry.clone());
        self
    }

    /// Build the loader
    pub fn build(self) -> Result<Arc<SegmentLoader>> {
        self.config.validate()?;

        let executor = self
            .executor
            .ok_or_else(|| Error::Configuration("No segment executor configured".to_string()))?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(SegmentStore::with_capacity(self.config.store.capacity_hint)));

        let metrics = self
            .registry
            .as_ref()
            .map(SegmentMetrics::register)
            .transpose()?;

        info!(
            capacity_hint = self.config.store.capacity_hint,
            max_measures = self.config.loader.max_measures_per_query,
            grouping_sets = self.config.loader.use_grouping_sets,
            metrics = metrics.is_some(),
            "Segment loader created"
        );

        Ok(Arc::new(SegmentLoader {
            config: self.config,
            executor,
            store,
            metrics,
            stats: LoaderStats::default(),
        }))
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Claims held for one grouping set, indexed like its segments
type SetClaims = Vec<Option<ClaimGuard<SegmentKey, Arc<LoadedSegment>>>>;

/// Loads segment batches, collapsing concurrent requests per segment
pub struct SegmentLoader {
    config: Config,
    executor: Arc<dyn SegmentExecutor>,
    store: Arc<SegmentStore>,
    metrics: Option<SegmentMetrics>,
    stats: LoaderStats,
}

impl SegmentLoader {
    /// Start building a loader
    pub fn builder() -> SegmentLoaderBuilder {
        SegmentLoaderBuilder::default()
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<SegmentStore> {
        &self.store
    }

    /// Loader statistics
    pub fn stats(&self) -> &LoaderStats {
        &self.stats
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Published segment, without blocking or loading
    pub fn cached(&self, segment: &Segment) -> Option<Arc<LoadedSegment>> {
        self.store.try_get(&segment.key())
    }

    /// Load every segment of `batch`
    ///
    /// Returns the loaded segments of all grouping sets, finest first, each
    /// set in segment order.
    pub fn load(&self, batch: SegmentBatch) -> Result<Vec<Arc<LoadedSegment>>> {
        self.load_with(batch, None)
    }

    /// Like [`load`](Self::load), but waits on other callers' loads can be
    /// cancelled through `token`
    pub fn load_cancellable(
        &self,
        batch: SegmentBatch,
        token: &CancellationToken,
    ) -> Result<Vec<Arc<LoadedSegment>>> {
        self.load_with(batch, Some(token))
    }

    fn load_with(
        &self,
        batch: SegmentBatch,
        token: Option<&CancellationToken>,
    ) -> Result<Vec<Arc<LoadedSegment>>> {
        let list = GroupingSetsList::new(batch.grouping_sets)?;
        let spec = AggregateQuerySpec::new(list, None)?;

        let measures = spec.segments().len();
        let limit = self.config.loader.max_measures_per_query;
        if measures > limit {
            return Err(PlanError::TooManyMeasures {
                count: measures,
                limit,
            }
            .into());
        }

        let list = spec.grouping_sets_list();
        let mut results: Vec<Vec<Option<Arc<LoadedSegment>>>> = Vec::new();
        let mut claims: Vec<SetClaims> = Vec::new();
        let mut in_flight: Vec<(usize, usize, SegmentKey)> = Vec::new();
        let mut hits = 0usize;

        for (set_index, set) in list.grouping_sets().iter().enumerate() {
            let mut set_results = Vec::with_capacity(set.segments().len());
            let mut set_claims = Vec::with_capacity(set.segments().len());
            for (segment_index, segment) in set.segments().iter().enumerate() {
                let key = segment.key();
                match self.store.try_claim(&key) {
                    Claim::Present(loaded) => {
                        hits += 1;
                        set_results.push(Some(loaded));
                        set_claims.push(None);
                    }
                    Claim::Claimed(guard) => {
                        set_results.push(None);
                        set_claims.push(Some(guard));
                    }
                    Claim::InFlight => {
                        set_results.push(None);
                        set_claims.push(None);
                        in_flight.push((set_index, segment_index, key));
                    }
                }
            }
            results.push(set_results);
            claims.push(set_claims);
        }

        let claimed: usize = claims.iter().flatten().filter(|c| c.is_some()).count();
        debug!(
            segments = list.all_segments().count(),
            hits = hits,
            claimed = claimed,
            in_flight = in_flight.len(),
            "Segment claims resolved"
        );
        self.stats.hits.fetch_add(hits as u64, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_hits(hits);
        }

        if claimed > 0 {
            if let Err(e) = self.execute_claims(&spec, &mut claims, &mut results) {
                let message: Arc<str> = Arc::from(e.to_string());
                let mut failed = 0usize;
                for guard in claims.iter_mut().flatten().filter_map(Option::take) {
                    guard.fail(Arc::clone(&message));
                    failed += 1;
                }
                self.record_failures(failed);
                warn!(error = %e, failed_segments = failed, "Segment load failed");
                return Err(e);
            }
        }

        self.join_in_flight(in_flight, &mut results, token)?;

        // every slot is filled by now: hit, published or joined
        Ok(results.into_iter().flatten().flatten().collect())
    }

    /// Run the statements covering every claimed segment and publish them
    fn execute_claims(
        &self,
        spec: &AggregateQuerySpec,
        claims: &mut [SetClaims],
        results: &mut [Vec<Option<Arc<LoadedSegment>>>],
    ) -> Result<()> {
        let list = spec.grouping_sets_list();
        let needed: Vec<usize> = claims
            .iter()
            .enumerate()
            .filter(|(_, set)| set.iter().any(Option::is_some))
            .map(|(i, _)| i)
            .collect();

        // each query is a list of grouping-set indices, finest first
        let queries: Vec<Vec<usize>> =
            if self.config.loader.use_grouping_sets && needed.first() == Some(&0) {
                vec![needed]
            } else {
                needed.into_iter().map(|i| vec![i]).collect()
            };

        for set_indices in queries {
            let sets: Vec<GroupingSet> = set_indices
                .iter()
                .map(|&i| list.grouping_sets()[i].clone())
                .collect();
            let sub_spec = AggregateQuerySpec::new(
                GroupingSetsList::new(sets)?,
                spec.compound_predicates().map(<[CompoundPredicate]>::to_vec),
            )?;

            let data = self.execute_spec(&sub_spec)?;

            let mut published = 0usize;
            for (local, set_data) in data.into_iter().enumerate() {
                let set_index = set_indices[local];
                let segments = list.grouping_sets()[set_index].segments();
                for (segment_index, segment_data) in set_data.into_iter().enumerate() {
                    if let Some(guard) = claims[set_index][segment_index].take() {
                        let loaded = Arc::new(LoadedSegment::new(
                            Arc::clone(&segments[segment_index]),
                            segment_data,
                        ));
                        guard.publish(Arc::clone(&loaded));
                        results[set_index][segment_index] = Some(loaded);
                        published += 1;
                    }
                }
            }

            self.stats.loaded.fetch_add(published as u64, Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.record_loads(LoadOutcome::Loaded, published);
            }
            debug!(published = published, grouping_sets = set_indices.len(), "Segments published");
        }
        Ok(())
    }

    /// Render, execute and decode one statement
    fn execute_spec(&self, spec: &AggregateQuerySpec) -> Result<Vec<Vec<SegmentData>>> {
        let statement = SqlStatement {
            id: NEXT_STATEMENT_ID.fetch_add(1, Ordering::Relaxed),
            purpose: StatementPurpose::CellSegment,
            sql: spec.to_sql()?,
            layout: spec.layout(),
        };
        debug!(
            statement_id = statement.id,
            purpose = %statement.purpose,
            measures = statement.layout.measures,
            grouping_sets = spec.grouping_sets_list().grouping_sets().len(),
            sql = %statement.sql,
            "Executing segment statement"
        );

        let started = Instant::now();
        let result = self.executor.execute(&statement);
        let elapsed = started.elapsed();
        self.stats.statements.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_query(statement.purpose.as_str(), elapsed);
        }

        let result = result?;
        debug!(
            statement_id = statement.id,
            rows = result.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Segment statement finished"
        );
        Ok(decode_result(spec.grouping_sets_list(), statement.layout, &result)?)
    }

    /// Wait for segments other callers are loading
    fn join_in_flight(
        &self,
        in_flight: Vec<(usize, usize, SegmentKey)>,
        results: &mut [Vec<Option<Arc<LoadedSegment>>>],
        token: Option<&CancellationToken>,
    ) -> Result<()> {
        if in_flight.is_empty() {
            return Ok(());
        }
        let waits = in_flight.len();
        if let Some(metrics) = &self.metrics {
            metrics.record_waits(waits);
        }

        let timeout = self.config.store.wait_timeout();
        for (set_index, segment_index, key) in in_flight {
            match self.store.get_with(&key, timeout, token) {
                Ok(loaded) => {
                    results[set_index][segment_index] = Some(loaded);
                    self.stats.joined.fetch_add(1, Ordering::Relaxed);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_loads(LoadOutcome::Joined, 1);
                    }
                }
                Err(e) => {
                    self.record_failures(1);
                    warn!(key = %key, error = %e, "Waiting for segment failed");
                    return Err(e.into());
                }
            }
        }
        debug!(joined = waits, "Joined in-flight segment loads");
        Ok(())
    }

    fn record_failures(&self, count: usize) {
        self.stats.failures.fetch_add(count as u64, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_loads(LoadOutcome::Failed, count);
        }
    }
}

impl std::fmt::Debug for SegmentLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentLoader")
            .field("config", &self.config)
            .field("segments", &self.store.len())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
