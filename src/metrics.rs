//! Metrics collection and export module
//!
//! One `Metrics` is built at startup and shared by `Arc` with the ledger pool,
//! the daemon and the control surface. Each instance owns its own registry.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,

    // Polling
    pub poll_cycles_total: IntCounter,
    pub poll_cycle_failures_total: IntCounter,
    pub fees_captured_total: IntCounter,
    pub lamports_accrued_total: IntCounter,
    pub extraction_errors_total: IntCounter,

    // Flushing
    pub flushes_total: IntCounter,
    pub flush_failures_total: IntCounter,
    pub lamports_flushed_total: IntCounter,

    // Ledger boundary
    pub ledger_attempts_total: IntCounter,
    pub ledger_failures_total: IntCounter,
    pub circuit_rejections_total: IntCounter,
    pub rate_limit_rejections_total: IntCounter,
    pub fallback_calls_total: IntCounter,

    // Distribution
    pub distribution_rounds_total: IntCounter,
    pub recipients_funded_total: IntCounter,
    pub recipients_deferred_total: IntCounter,

    // Gauges
    pub poll_interval_ms: IntGauge,
    pub pending_accrual_lamports: IntGauge,
    pub circuit_state: IntGauge,

    // Histograms
    pub ledger_latency: Histogram,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("poll_cycles_total", &self.poll_cycles_total.get())
            .field("pending_accrual_lamports", &self.pending_accrual_lamports.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> anyhow::Result<IntCounter> {
            let c = IntCounter::with_opts(Opts::new(name, help))?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };

        let poll_cycles_total = counter("poll_cycles_total", "Poll cycles completed")?;
        let poll_cycle_failures_total = counter(
            "poll_cycle_failures_total",
            "Poll cycles where at least one asset failed",
        )?;
        let fees_captured_total =
            counter("fees_captured_total", "Transactions with positive accrual")?;
        let lamports_accrued_total =
            counter("lamports_accrued_total", "Lamports added to accumulators")?;
        let extraction_errors_total = counter(
            "extraction_errors_total",
            "Transactions that failed to fetch or parse",
        )?;
        let flushes_total = counter("flushes_total", "Successful accrual commits")?;
        let flush_failures_total = counter("flush_failures_total", "Failed accrual commits")?;
        let lamports_flushed_total =
            counter("lamports_flushed_total", "Lamports committed to the ledger")?;
        let ledger_attempts_total =
            counter("ledger_attempts_total", "Individual ledger call attempts")?;
        let ledger_failures_total =
            counter("ledger_failures_total", "Ledger calls that failed after retries")?;
        let circuit_rejections_total = counter(
            "circuit_rejections_total",
            "Calls refused by the open circuit breaker",
        )?;
        let rate_limit_rejections_total = counter(
            "rate_limit_rejections_total",
            "Calls that timed out waiting for a rate limiter token",
        )?;
        let fallback_calls_total =
            counter("fallback_calls_total", "Calls routed to the fallback endpoint")?;
        let distribution_rounds_total =
            counter("distribution_rounds_total", "Distribution rounds executed")?;
        let recipients_funded_total =
            counter("recipients_funded_total", "Recipients that received an allocation")?;
        let recipients_deferred_total = counter(
            "recipients_deferred_total",
            "Recipients deferred below the minimum viable allocation",
        )?;

        let poll_interval_ms =
            IntGauge::with_opts(Opts::new("poll_interval_ms", "Current adaptive poll interval"))?;
        let pending_accrual_lamports = IntGauge::with_opts(Opts::new(
            "pending_accrual_lamports",
            "Accrued lamports not yet flushed",
        ))?;
        let circuit_state = IntGauge::with_opts(Opts::new(
            "circuit_state",
            "Circuit breaker state (0 closed, 1 half-open, 2 open)",
        ))?;

        let ledger_latency = Histogram::with_opts(
            HistogramOpts::new("ledger_latency_seconds", "Ledger call latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        registry.register(Box::new(poll_interval_ms.clone()))?;
        registry.register(Box::new(pending_accrual_lamports.clone()))?;
        registry.register(Box::new(circuit_state.clone()))?;
        registry.register(Box::new(ledger_latency.clone()))?;

        Ok(Self {
            registry,
            poll_cycles_total,
            poll_cycle_failures_total,
            fees_captured_total,
            lamports_accrued_total,
            extraction_errors_total,
            flushes_total,
            flush_failures_total,
            lamports_flushed_total,
            ledger_attempts_total,
            ledger_failures_total,
            circuit_rejections_total,
            rate_limit_rejections_total,
            fallback_calls_total,
            distribution_rounds_total,
            recipients_funded_total,
            recipients_deferred_total,
            poll_interval_ms,
            pending_accrual_lamports,
            circuit_state,
            ledger_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every registered metric
    pub fn encode(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
