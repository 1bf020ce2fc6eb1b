//! Prometheus metrics for the lattice node.
//!
//! [`NodeMetrics`] owns a dedicated [`Registry`]. Counters are bumped from
//! component observers as events happen; gauges are sampled from component
//! sizes by [`Node::refresh_metrics`](crate::Node::refresh_metrics).
//! [`NodeMetrics::encode`] renders everything in the text exposition format.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};

use crate::NodeError;

/// Central collection of all node-level Prometheus metrics.
pub struct NodeMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Blocks whose confirmation height has been written.
    pub cemented_blocks: IntCounter,
    /// Blocks that went through the block processor, whatever the outcome.
    pub blocks_processed: IntCounter,
    /// Votes submitted to the vote router.
    pub votes_processed: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    pub active_elections: IntGauge,
    pub vote_cache: IntGauge,
    pub gap_cache: IntGauge,
    pub unchecked: IntGauge,
    pub confirming_set: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Election duration from start to confirmation, in milliseconds.
    pub election_duration_ms: Histogram,
}

impl NodeMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        // Counters
        let cemented_blocks = register_int_counter_with_registry!(
            Opts::new("lattice_cemented_blocks_total", "Total blocks cemented"),
            registry
        )
        .expect("failed to register cemented_blocks counter");

        let blocks_processed = register_int_counter_with_registry!(
            Opts::new(
                "lattice_blocks_processed_total",
                "Total blocks processed by the block processor"
            ),
            registry
        )
        .expect("failed to register blocks_processed counter");

        let votes_processed = register_int_counter_with_registry!(
            Opts::new("lattice_votes_processed_total", "Total votes processed"),
            registry
        )
        .expect("failed to register votes_processed counter");

        // Gauges
        let active_elections = register_int_gauge_with_registry!(
            Opts::new("lattice_active_elections", "Current number of active elections"),
            registry
        )
        .expect("failed to register active_elections gauge");

        let vote_cache = register_int_gauge_with_registry!(
            Opts::new("lattice_vote_cache_size", "Hashes held in the vote cache"),
            registry
        )
        .expect("failed to register vote_cache gauge");

        let gap_cache = register_int_gauge_with_registry!(
            Opts::new("lattice_gap_cache_size", "Blocks waiting on a missing dependency"),
            registry
        )
        .expect("failed to register gap_cache gauge");

        let unchecked = register_int_gauge_with_registry!(
            Opts::new("lattice_unchecked_size", "Blocks held in the unchecked map"),
            registry
        )
        .expect("failed to register unchecked gauge");

        let confirming_set = register_int_gauge_with_registry!(
            Opts::new("lattice_confirming_set_size", "Hashes queued for cementing"),
            registry
        )
        .expect("failed to register confirming_set gauge");

        // Exponential buckets covering 1 ms to about 16 s.
        let election_duration_ms = register_histogram_with_registry!(
            HistogramOpts::new(
                "lattice_election_duration_ms",
                "Election duration in milliseconds"
            )
            .buckets(prometheus::exponential_buckets(1.0, 2.0, 15).expect("valid buckets")),
            registry
        )
        .expect("failed to register election_duration_ms histogram");

        Self {
            registry,
            cemented_blocks,
            blocks_processed,
            votes_processed,
            active_elections,
            vote_cache,
            gap_cache,
            unchecked,
            confirming_set,
            election_duration_ms,
        }
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, NodeError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| NodeError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
