//! Operational metrics of the monitor itself.
//!
//! Registered on the same registry as the engine results, under the same
//! prefix:
//!
//! **Counters:**
//! - `rows_ingested_total`: rows accepted into the window
//! - `batches_rejected_total{reason}`: batches refused before append
//! - `evaluations_total{outcome}`: gate outcomes (evaluated, failed, throttled, insufficient_data)
//!
//! **Gauges:**
//! - `window_rows`, `pending_new_rows`, `reference_rows`
//!
//! **Histograms:**
//! - `evaluation_duration_seconds`: engine wall time
//!
//! **Info:**
//! - `build_info{version}`

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Prometheus handles for the monitor's own behavior.
///
/// All updates are thread-safe atomics inside the prometheus crate.
#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,

    // Counters
    pub rows_ingested_total: IntCounter,
    pub batches_rejected_total: IntCounterVec,
    pub evaluations_total: IntCounterVec,

    // Gauges
    pub window_rows: IntGauge,
    pub pending_new_rows: IntGauge,
    pub reference_rows: IntGauge,

    // Histograms
    pub evaluation_duration_seconds: Histogram,
}

impl ServiceMetrics {
    /// Create and register all metrics on `registry`.
    pub fn new(registry: Registry, prefix: &str) -> Result<Self, prometheus::Error> {
        let name = |suffix: &str| format!("{}{}", prefix, suffix);

        // -- Counters --
        let rows_ingested_total = IntCounter::new(
            name("rows_ingested_total"),
            "Rows accepted into the sliding window",
        )?;
        registry.register(Box::new(rows_ingested_total.clone()))?;

        let batches_rejected_total = IntCounterVec::new(
            Opts::new(
                name("batches_rejected_total"),
                "Ingestion batches rejected before append",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(batches_rejected_total.clone()))?;

        let evaluations_total = IntCounterVec::new(
            Opts::new(name("evaluations_total"), "Evaluation gate outcomes"),
            &["outcome"],
        )?;
        registry.register(Box::new(evaluations_total.clone()))?;

        // -- Gauges --
        let window_rows = IntGauge::new(name("window_rows"), "Rows currently in the window")?;
        registry.register(Box::new(window_rows.clone()))?;

        let pending_new_rows = IntGauge::new(
            name("pending_new_rows"),
            "Rows appended since they were last evaluated",
        )?;
        registry.register(Box::new(pending_new_rows.clone()))?;

        let reference_rows =
            IntGauge::new(name("reference_rows"), "Rows in the active reference dataset")?;
        registry.register(Box::new(reference_rows.clone()))?;

        // -- Histograms --
        let evaluation_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                name("evaluation_duration_seconds"),
                "Statistical engine wall time in seconds",
            )
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        )?;
        registry.register(Box::new(evaluation_duration_seconds.clone()))?;

        // -- Info --
        let build_info = IntGauge::with_opts(
            Opts::new(name("build_info"), "Build information")
                .const_label("version", env!("CARGO_PKG_VERSION")),
        )?;
        build_info.set(1);
        registry.register(Box::new(build_info))?;

        Ok(Self {
            registry,
            rows_ingested_total,
            batches_rejected_total,
            evaluations_total,
            window_rows,
            pending_new_rows,
            reference_rows,
            evaluation_duration_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_rejected(&self, reason: &str) {
        self.batches_rejected_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.evaluations_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_evaluation_duration(&self, duration_secs: f64) {
        self.evaluation_duration_seconds.observe(duration_secs);
    }

    /// Refresh the window gauges.
    pub fn set_window(&self, window_rows: usize, pending_new_rows: usize) {
        self.window_rows.set(window_rows as i64);
        self.pending_new_rows.set(pending_new_rows as i64);
    }

    pub fn set_reference_rows(&self, rows: usize) {
        self.reference_rows.set(rows as i64);
    }

    /// Render the whole registry in Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        render_registry(&self.registry)
    }
}

/// Encode every family in `registry` as Prometheus text.
pub fn render_registry(registry: &Registry) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
