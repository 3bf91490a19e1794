//! Prometheus Metrics Registry - Engine Observability
//!
//! Registers the engine's counters, gauges and histograms and renders
//! them in the Prometheus text format for the `/metrics` endpoint.
//! All metrics follow the naming convention `timed_engine_*`.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Centralized Prometheus metrics for the engine.
pub struct EngineMetrics {
    /// Prometheus registry.
    registry: Registry,
    /// Positions opened, by instrument and direction.
    pub positions_opened: IntCounterVec,
    /// Placement rejections, by reason code.
    pub placements_rejected: IntCounterVec,
    /// Positions cancelled before expiry, by instrument.
    pub positions_cancelled: IntCounterVec,
    /// Positions settled, by instrument and result.
    pub positions_settled: IntCounterVec,
    /// Settlement attempts that failed and will be retried next sweep.
    pub settlement_failures: IntCounter,
    /// Sweeps skipped because one was already running.
    pub sweeps_skipped: IntCounter,
    /// Wall-clock duration of completed sweeps.
    pub sweep_duration_seconds: Histogram,
    /// Feed connection status (1 = connected, 0 = disconnected).
    pub feed_connected: IntGauge,
    /// Feed reconnection attempts.
    pub feed_reconnects: IntCounter,
    /// Quotes applied to the cache, by instrument.
    pub quote_updates: IntCounterVec,
}

impl EngineMetrics {
    /// Create and register all metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let positions_opened = IntCounterVec::new(
            Opts::new("timed_engine_positions_opened_total", "Positions opened"),
            &["instrument", "direction"],
        )?;

        let placements_rejected = IntCounterVec::new(
            Opts::new(
                "timed_engine_placements_rejected_total",
                "Placement requests rejected",
            ),
            &["reason"],
        )?;

        let positions_cancelled = IntCounterVec::new(
            Opts::new(
                "timed_engine_positions_cancelled_total",
                "Positions cancelled and refunded",
            ),
            &["instrument"],
        )?;

        let positions_settled = IntCounterVec::new(
            Opts::new("timed_engine_positions_settled_total", "Positions settled"),
            &["instrument", "result"],
        )?;

        let settlement_failures = IntCounter::new(
            "timed_engine_settlement_failures_total",
            "Settlement attempts that failed",
        )?;

        let sweeps_skipped = IntCounter::new(
            "timed_engine_sweeps_skipped_total",
            "Sweeps skipped because a sweep was in flight",
        )?;

        let sweep_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "timed_engine_sweep_duration_seconds",
                "Duration of settlement sweeps",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;

        let feed_connected = IntGauge::new(
            "timed_engine_feed_connected",
            "Ticker feed connection status (1=connected, 0=disconnected)",
        )?;

        let feed_reconnects = IntCounter::new(
            "timed_engine_feed_reconnects_total",
            "Ticker feed reconnection attempts",
        )?;

        let quote_updates = IntCounterVec::new(
            Opts::new("timed_engine_quote_updates_total", "Quotes applied to the cache"),
            &["instrument"],
        )?;

        registry.register(Box::new(positions_opened.clone()))?;
        registry.register(Box::new(placements_rejected.clone()))?;
        registry.register(Box::new(positions_cancelled.clone()))?;
        registry.register(Box::new(positions_settled.clone()))?;
        registry.register(Box::new(settlement_failures.clone()))?;
        registry.register(Box::new(sweeps_skipped.clone()))?;
        registry.register(Box::new(sweep_duration_seconds.clone()))?;
        registry.register(Box::new(feed_connected.clone()))?;
        registry.register(Box::new(feed_reconnects.clone()))?;
        registry.register(Box::new(quote_updates.clone()))?;

        Ok(Self {
            registry,
            positions_opened,
            placements_rejected,
            positions_cancelled,
            positions_settled,
            settlement_failures,
            sweeps_skipped,
            sweep_duration_seconds,
            feed_connected,
            feed_reconnects,
            quote_updates,
        })
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
