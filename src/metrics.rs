//! Prometheus metrics for segment loading
//!
//! Metrics are registered on a caller-owned [`Registry`]; nothing is
//! registered globally, so several loaders (or tests) can coexist in one
//! process.

use crate::error::{Error, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Outcome label of `segment_loads_total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Loaded and published by this caller
    Loaded,
    /// Published by another caller while we waited
    Joined,
    /// Load or wait failed
    Failed,
}

impl LoadOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            LoadOutcome::Loaded => "loaded",
            LoadOutcome::Joined => "joined",
            LoadOutcome::Failed => "failed",
        }
    }
}

/// Counters and histograms of one segment loader
#[derive(Debug, Clone)]
pub struct SegmentMetrics {
    load_queries: IntCounter,
    loads: IntCounterVec,
    cache_hits: IntCounter,
    waits: IntCounter,
    query_duration: HistogramVec,
}

impl SegmentMetrics {
    /// Create the metrics and register them on `registry`
    pub fn register(registry: &Registry) -> Result<Self> {
        let load_queries = IntCounter::new(
            "segment_load_queries_total",
            "Segment load statements executed",
        )
        .map_err(metrics_error)?;
        let loads = IntCounterVec::new(
            Opts::new("segment_loads_total", "Segments resolved by outcome"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let cache_hits = IntCounter::new(
            "segment_cache_hits_total",
            "Segments already present in the store",
        )
        .map_err(metrics_error)?;
        let waits = IntCounter::new(
            "segment_waits_total",
            "Segments waited on while another caller loaded them",
        )
        .map_err(metrics_error)?;
        let query_duration = HistogramVec::new(
            HistogramOpts::new(
                "segment_query_duration_seconds",
                "Segment statement execution latency in seconds",
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["purpose"],
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(load_queries.clone())).map_err(metrics_error)?;
        registry.register(Box::new(loads.clone())).map_err(metrics_error)?;
        registry.register(Box::new(cache_hits.clone())).map_err(metrics_error)?;
        registry.register(Box::new(waits.clone())).map_err(metrics_error)?;
        registry.register(Box::new(query_duration.clone())).map_err(metrics_error)?;

        Ok(Self {
            load_queries,
            loads,
            cache_hits,
            waits,
            query_duration,
        })
    }

    /// Record one executed statement
    #[inline]
    pub fn record_query(&self, purpose: &str, elapsed: Duration) {
        self.load_queries.inc();
        self.query_duration
            .with_label_values(&[purpose])
            .observe(elapsed.as_secs_f64());
    }

    /// Record resolved segments
    #[inline]
    pub fn record_loads(&self, outcome: LoadOutcome, count: usize) {
        self.loads
            .with_label_values(&[outcome.as_str()])
            .inc_by(count as u64);
    }

    /// Record store hits
    #[inline]
    pub fn record_hits(&self, count: usize) {
        self.cache_hits.inc_by(count as u64);
    }

    /// Record segments waited on
    #[inline]
    pub fn record_waits(&self, count: usize) {
        self.waits.inc_by(count as u64);
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Metrics(e.to_string())
}

/// Encode everything registered on `registry` in Prometheus text format
pub fn gather_metrics(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::Metrics(format!("Failed to encode metrics: {}", e)))?;

    String::from_utf8(buffer)
        .map_err(|e| Error::Metrics(format!("Metrics contain invalid UTF-8: {}", e)))
}
