//! Sliding-window monitoring service.
//!
//! [`MonitoringService`] owns the window, the reference and the metric sink
//! behind one mutex. Every ingestion runs schema check, append, gate,
//! evaluation and publish inside that critical section; scrapes read the
//! Prometheus registry and never take it.

pub mod descriptive;
pub mod engine;
pub mod gate;
pub mod reference;
pub mod sink;
pub mod window;

pub use descriptive::DescriptiveEngine;
pub use engine::{EngineError, EvaluationRunner, MetricSample, StatisticalEngine};
pub use gate::{EvaluationGate, GateDecision};
pub use reference::{seed, Fingerprint, ReferenceSet, SeededState};
pub use sink::{MetricSink, PublishReport};
pub use window::WindowBuffer;

use dm_common::{Error, Record, Result, Schema};
use dm_config::{ColumnMapping, MonitorConfig, MonitorKind};
use prometheus::Registry;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::logging::{event_names, LogContext, Stage};
use crate::metrics::ServiceMetrics;

/// Window and evaluation settings, lifted out of the config file.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub window_size: usize,
    pub use_reference: bool,
    pub moving_reference: bool,
    pub min_reference_size: usize,
    pub calculation_period: Option<Duration>,
    pub evaluation_timeout: Option<Duration>,
    pub date_column: Option<String>,
    pub mapping: ColumnMapping,
    pub monitors: Vec<MonitorKind>,
    pub metrics_prefix: String,
}

impl MonitorSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        let service = &config.service;
        MonitorSettings {
            window_size: service.window_size,
            use_reference: service.use_reference,
            moving_reference: service.moving_reference,
            min_reference_size: service.min_reference_size,
            calculation_period: service.calculation_period(),
            evaluation_timeout: service.evaluation_timeout(),
            date_column: config.date_column().map(str::to_string),
            mapping: config.column_mapping.clone(),
            monitors: service.monitors.clone(),
            metrics_prefix: config.metrics.prefix.clone(),
        }
    }

    /// Minimal settings for a window of `window_size` rows.
    pub fn with_window(window_size: usize) -> Self {
        MonitorSettings {
            window_size,
            use_reference: true,
            moving_reference: false,
            min_reference_size: 0,
            calculation_period: None,
            evaluation_timeout: None,
            date_column: None,
            mapping: ColumnMapping::default(),
            monitors: MonitorKind::ALL.to_vec(),
            metrics_prefix: "drift_monitor_".to_string(),
        }
    }
}

/// What happened to the evaluation step of one ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluationStatus {
    /// Empty batch; the gate did not run.
    Skipped,
    InsufficientData { size: usize, required: usize },
    Throttled { retry_after_ms: u64 },
    Evaluated {
        samples: usize,
        rejected: usize,
        duration_ms: u64,
        reference_replaced: bool,
    },
    Failed { error: String },
}

impl EvaluationStatus {
    fn outcome_label(&self) -> Option<&'static str> {
        match self {
            EvaluationStatus::Skipped => None,
            EvaluationStatus::InsufficientData { .. } => Some("insufficient_data"),
            EvaluationStatus::Throttled { .. } => Some("throttled"),
            EvaluationStatus::Evaluated { .. } => Some("evaluated"),
            EvaluationStatus::Failed { .. } => Some("failed"),
        }
    }
}

/// Result of one ingestion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub accepted: usize,
    pub window_rows: usize,
    pub pending_new_rows: usize,
    pub evaluation: EvaluationStatus,
}

/// Point-in-time view of the service state.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub window_size: usize,
    pub window_rows: usize,
    pub pending_new_rows: usize,
    pub reference_rows: usize,
    pub reference_fingerprint: Fingerprint,
    pub schema: Schema,
}

struct MonitorState {
    window: WindowBuffer,
    reference: ReferenceSet,
    schema: Schema,
    gate: EvaluationGate,
    sink: MetricSink,
}

/// The sliding-window controller.
pub struct MonitoringService {
    settings: MonitorSettings,
    engine: Arc<dyn StatisticalEngine>,
    runner: EvaluationRunner,
    state: Mutex<MonitorState>,
    metrics: ServiceMetrics,
    log: LogContext,
}

impl MonitoringService {
    /// Build the service from a historical dataset.
    ///
    /// Splits the history into reference and seeded window, enforces
    /// `min_reference_size`, registers metrics on `registry` and publishes
    /// the reference fingerprint.
    pub fn new(
        settings: MonitorSettings,
        history: Vec<Record>,
        engine: Arc<dyn StatisticalEngine>,
        registry: Registry,
        log: LogContext,
    ) -> Result<Self> {
        let SeededState {
            reference,
            window,
            schema,
        } = seed(history, settings.window_size, settings.use_reference)?;
        reference.ensure_min_size(settings.min_reference_size)?;

        let metrics = ServiceMetrics::new(registry.clone(), &settings.metrics_prefix)
            .map_err(|e| Error::Metrics(e.to_string()))?;
        let mut sink = MetricSink::new(registry, settings.metrics_prefix.clone());
        sink.publish_reference_hash(None, reference.fingerprint())?;

        metrics.set_reference_rows(reference.len());
        metrics.set_window(window.size(), window.pending_new_rows());

        let monitors = settings
            .monitors
            .iter()
            .map(MonitorKind::as_str)
            .collect::<Vec<_>>()
            .join(",");
        crate::log_event!(
            log,
            INFO,
            event_names::REFERENCE_LOADED,
            Stage::Init,
            "reference dataset ready",
            reference_rows = reference.len(),
            window_rows = window.size(),
            fingerprint = reference.fingerprint().as_str(),
            monitors = monitors.as_str()
        );

        let gate = EvaluationGate::new(settings.window_size, settings.calculation_period);
        Ok(MonitoringService {
            state: Mutex::new(MonitorState {
                window,
                reference,
                schema,
                gate,
                sink,
            }),
            settings,
            engine,
            runner: EvaluationRunner::new(),
            metrics,
            log,
        })
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    /// Registry holding both service metrics and engine results.
    pub fn registry(&self) -> &Registry {
        self.metrics.registry()
    }

    /// Render all metrics; does not take the ingestion lock.
    pub fn render_metrics(&self) -> Result<String> {
        self.metrics
            .render()
            .map_err(|e| Error::Metrics(e.to_string()))
    }

    pub fn status(&self) -> MonitorStatus {
        let state = self.lock();
        MonitorStatus {
            window_size: self.settings.window_size,
            window_rows: state.window.size(),
            pending_new_rows: state.window.pending_new_rows(),
            reference_rows: state.reference.len(),
            reference_fingerprint: state.reference.fingerprint().clone(),
            schema: state.schema.clone(),
        }
    }

    /// Ingest a batch now.
    pub fn ingest(&self, rows: Vec<Record>) -> Result<IngestOutcome> {
        self.ingest_at(rows, Instant::now())
    }

    /// Ingest a batch as of `now`.
    ///
    /// Rejected batches (bad timestamps, schema mismatch) leave the window
    /// and counters untouched. Evaluation failures are not errors here;
    /// they are logged, counted and reported in the outcome.
    pub fn ingest_at(&self, mut rows: Vec<Record>, now: Instant) -> Result<IngestOutcome> {
        let mut guard = self.lock();
        let state = &mut *guard;

        if rows.is_empty() {
            return Ok(IngestOutcome {
                accepted: 0,
                window_rows: state.window.size(),
                pending_new_rows: state.window.pending_new_rows(),
                evaluation: EvaluationStatus::Skipped,
            });
        }

        if let Err(e) = self.validate_batch(state, &mut rows) {
            let reason = match e {
                Error::SchemaMismatch { .. } => "schema_mismatch",
                _ => "invalid_batch",
            };
            self.metrics.record_rejected(reason);
            crate::log_event!(
                self.log,
                WARN,
                event_names::INGEST_REJECTED,
                Stage::Ingest,
                e.to_string(),
                rows = rows.len(),
                reason = reason
            );
            return Err(e);
        }

        let appended = state.window.append(rows);
        self.metrics.rows_ingested_total.inc_by(appended as u64);
        crate::log_event!(
            self.log,
            DEBUG,
            event_names::INGEST_ACCEPTED,
            Stage::Ingest,
            "batch appended",
            rows = appended,
            window_rows = state.window.size()
        );

        let evaluation = match state.gate.check(&mut state.window, now) {
            GateDecision::InsufficientData { size, required } => {
                crate::log_event!(
                    self.log,
                    INFO,
                    event_names::GATE_INSUFFICIENT_DATA,
                    Stage::Evaluate,
                    format!(
                        "Not enough data for evaluation: window holds {} rows, {} required",
                        size, required
                    ),
                    size = size,
                    required = required
                );
                EvaluationStatus::InsufficientData { size, required }
            }
            GateDecision::Throttled { evicted, remaining } => {
                crate::log_event!(
                    self.log,
                    DEBUG,
                    event_names::GATE_THROTTLED,
                    Stage::Evaluate,
                    "evaluation throttled",
                    evicted = evicted,
                    retry_after_ms = remaining.as_millis() as u64
                );
                EvaluationStatus::Throttled {
                    retry_after_ms: remaining.as_millis() as u64,
                }
            }
            GateDecision::Evaluate { .. } => {
                let status = self.evaluate(state);
                state.window.consume(appended);
                status
            }
        };

        if let Some(outcome) = evaluation.outcome_label() {
            self.metrics.record_outcome(outcome);
        }
        self.metrics
            .set_window(state.window.size(), state.window.pending_new_rows());

        Ok(IngestOutcome {
            accepted: appended,
            window_rows: state.window.size(),
            pending_new_rows: state.window.pending_new_rows(),
            evaluation,
        })
    }

    /// Swap in a new reference dataset.
    ///
    /// The rows must match the monitor's schema and satisfy
    /// `min_reference_size`. The old fingerprint's gauge drops to 0.
    pub fn replace_reference(&self, rows: Vec<Record>) -> Result<Fingerprint> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.schema.is_empty() {
            state.schema.check_rows(&rows)?;
        }
        let candidate = ReferenceSet::new(rows);
        candidate.ensure_min_size(self.settings.min_reference_size)?;
        self.install_reference(state, candidate)?;
        Ok(state.reference.fingerprint().clone())
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        // A panic inside the critical section leaves the window consistent
        // (every mutation is a single call), so keep serving.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn validate_batch(&self, state: &mut MonitorState, rows: &mut [Record]) -> Result<()> {
        if let Some(column) = self.settings.date_column.as_deref() {
            for row in rows.iter_mut() {
                row.coerce_datetime(column)?;
            }
        }
        if let Some(index) = rows.iter().position(Record::is_empty) {
            return Err(Error::InvalidBatch(format!("row {} has no columns", index)));
        }
        if !state.schema.is_empty() {
            return state.schema.check_rows(rows);
        }
        // Nothing loaded to compare against: the first accepted batch fixes it.
        let candidate = rows[0].schema();
        candidate.check_rows(rows)?;
        state.schema = candidate;
        Ok(())
    }

    fn evaluate(&self, state: &mut MonitorState) -> EvaluationStatus {
        let current = state.window.snapshot();
        let window_rows = current.len();
        let started = Instant::now();
        let result = self.runner.run(
            &self.engine,
            state.reference.shared_rows(),
            current,
            &self.settings.mapping,
            self.settings.evaluation_timeout,
        );
        let elapsed = started.elapsed();
        self.metrics
            .record_evaluation_duration(elapsed.as_secs_f64());

        let samples = match result {
            Ok(samples) => samples,
            Err(e) => {
                let error = Error::from(e);
                crate::log_event!(
                    self.log,
                    WARN,
                    event_names::EVALUATE_FAILED,
                    Stage::Evaluate,
                    error.to_string(),
                    engine = self.engine.name(),
                    code = error.code()
                );
                return EvaluationStatus::Failed {
                    error: error.to_string(),
                };
            }
        };

        let report = state.sink.publish_all(&samples);
        for rejected in &report.rejected {
            crate::log_event!(
                self.log,
                WARN,
                event_names::PUBLISH_REJECTED,
                Stage::Publish,
                rejected.to_string()
            );
        }
        crate::log_event!(
            self.log,
            INFO,
            event_names::EVALUATE_FINISHED,
            Stage::Evaluate,
            "evaluation finished",
            engine = self.engine.name(),
            window_rows = window_rows,
            samples = report.written,
            rejected = report.rejected.len(),
            duration_ms = elapsed.as_millis() as u64
        );

        let reference_replaced = self.settings.moving_reference && self.roll_reference(state);

        EvaluationStatus::Evaluated {
            samples: report.written,
            rejected: report.rejected.len(),
            duration_ms: elapsed.as_millis() as u64,
            reference_replaced,
        }
    }

    /// Promote the just-evaluated window to reference.
    fn roll_reference(&self, state: &mut MonitorState) -> bool {
        let candidate = ReferenceSet::new(state.window.snapshot());
        if let Err(e) = candidate.ensure_min_size(self.settings.min_reference_size) {
            crate::log_event!(
                self.log,
                WARN,
                event_names::REFERENCE_REJECTED,
                Stage::Publish,
                e.to_string()
            );
            return false;
        }
        match self.install_reference(state, candidate) {
            Ok(()) => true,
            Err(e) => {
                crate::log_event!(
                    self.log,
                    WARN,
                    event_names::REFERENCE_REJECTED,
                    Stage::Publish,
                    e.to_string()
                );
                false
            }
        }
    }

    fn install_reference(&self, state: &mut MonitorState, candidate: ReferenceSet) -> Result<()> {
        let previous = state.reference.fingerprint().clone();
        state
            .sink
            .publish_reference_hash(Some(&previous), candidate.fingerprint())?;
        crate::log_event!(
            self.log,
            INFO,
            event_names::REFERENCE_REPLACED,
            Stage::Publish,
            "reference dataset replaced",
            previous = previous.as_str(),
            fingerprint = candidate.fingerprint().as_str(),
            reference_rows = candidate.len()
        );
        self.metrics.set_reference_rows(candidate.len());
        state.reference = candidate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        last_current: Mutex<usize>,
    }

    impl StatisticalEngine for Counting {
        fn evaluate(
            &self,
            _reference: &[Record],
            current: &[Record],
            _mapping: &ColumnMapping,
        ) -> std::result::Result<Vec<MetricSample>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_current.lock().unwrap() = current.len();
            Ok(vec![MetricSample::new("calls", 1.0)])
        }
    }

    struct Sleepy(Duration);

    impl StatisticalEngine for Sleepy {
        fn evaluate(
            &self,
            _reference: &[Record],
            _current: &[Record],
            _mapping: &ColumnMapping,
        ) -> std::result::Result<Vec<MetricSample>, EngineError> {
            std::thread::sleep(self.0);
            Ok(Vec::new())
        }
    }

    fn row(i: i64) -> Record {
        Record::new().with("x", i)
    }

    fn service(window: usize, history: Vec<Record>) -> (MonitoringService, Arc<Counting>) {
        let engine = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            last_current: Mutex::new(0),
        });
        let svc = MonitoringService::new(
            MonitorSettings::with_window(window),
            history,
            engine.clone(),
            Registry::new(),
            LogContext::new("run-test", "host-test"),
        )
        .unwrap();
        (svc, engine)
    }

    #[test]
    fn single_rows_until_full() {
        let (svc, engine) = service(5, vec![row(-1); 3]);
        // history shorter than window: all three rows seed the window
        assert_eq!(svc.status().window_rows, 3);
        assert_eq!(svc.status().reference_rows, 0);

        let out = svc.ingest(vec![row(0)]).unwrap();
        assert_eq!(
            out.evaluation,
            EvaluationStatus::InsufficientData {
                size: 4,
                required: 5
            }
        );
        let out = svc.ingest(vec![row(1)]).unwrap();
        assert!(matches!(out.evaluation, EvaluationStatus::Evaluated { .. }));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        // two rows appended, only the latest batch is consumed
        assert_eq!(out.pending_new_rows, 1);
        assert_eq!(out.window_rows, 5);
    }

    #[test]
    fn empty_batch_is_noop() {
        let (svc, engine) = service(1, vec![row(0), row(1)]);
        let out = svc.ingest(Vec::new()).unwrap();
        assert_eq!(out.evaluation, EvaluationStatus::Skipped);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn schema_mismatch_rejects_whole_batch() {
        let (svc, _) = service(5, vec![row(0), row(1)]);
        let before = svc.status();
        let err = svc
            .ingest(vec![row(2), Record::new().with("y", 1.0)])
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { row: 1, .. }));
        let after = svc.status();
        assert_eq!(before.window_rows, after.window_rows);
        assert_eq!(after.pending_new_rows, 0);
        assert!(svc
            .render_metrics()
            .unwrap()
            .contains("drift_monitor_batches_rejected_total{reason=\"schema_mismatch\"} 1"));
    }

    #[test]
    fn first_batch_fixes_schema_without_history() {
        let (svc, _) = service(2, Vec::new());
        svc.ingest(vec![row(0)]).unwrap();
        assert!(svc.status().schema.contains("x"));
        assert!(svc.ingest(vec![Record::new().with("z", 1.0)]).is_err());
    }

    #[test]
    fn rejected_first_batch_leaves_schema_open() {
        let (svc, _) = service(2, Vec::new());
        let err = svc
            .ingest(vec![row(0), Record::new().with("y", 1.0)])
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { row: 1, .. }));
        assert!(svc.status().schema.is_empty());

        svc.ingest(vec![Record::new().with("y", 1.0)]).unwrap();
        assert!(svc.status().schema.contains("y"));
        assert!(!svc.status().schema.contains("x"));
    }

    #[test]
    fn empty_records_rejected() {
        let (svc, _) = service(2, Vec::new());
        let err = svc.ingest(vec![Record::new()]).unwrap_err();
        assert!(matches!(err, Error::InvalidBatch(_)));
        assert!(svc.status().schema.is_empty());
        assert_eq!(svc.status().window_rows, 0);

        svc.ingest(vec![row(1)]).unwrap();
        assert!(svc.ingest(vec![row(2), Record::new()]).is_err());
        assert_eq!(svc.status().window_rows, 1);
        assert!(svc
            .render_metrics()
            .unwrap()
            .contains("drift_monitor_batches_rejected_total{reason=\"invalid_batch\"} 2"));
    }

    #[test]
    fn hung_evaluation_is_not_stacked() {
        let mut settings = MonitorSettings::with_window(1);
        settings.evaluation_timeout = Some(Duration::from_millis(20));
        let svc = MonitoringService::new(
            settings,
            vec![row(0), row(1)],
            Arc::new(Sleepy(Duration::from_millis(400))),
            Registry::new(),
            LogContext::new("r", "h"),
        )
        .unwrap();

        let first = svc.ingest(vec![row(2)]).unwrap();
        match first.evaluation {
            EvaluationStatus::Failed { error } => assert!(error.contains("timed out"), "{error}"),
            other => panic!("unexpected {other:?}"),
        }
        let second = svc.ingest(vec![row(3)]).unwrap();
        match second.evaluation {
            EvaluationStatus::Failed { error } => {
                assert!(error.contains("previous evaluation still running"), "{error}")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(svc
            .render_metrics()
            .unwrap()
            .contains("drift_monitor_evaluations_total{outcome=\"failed\"} 2"));
    }

    #[test]
    fn min_reference_size_is_fatal() {
        let mut settings = MonitorSettings::with_window(5);
        settings.min_reference_size = 10;
        let result = MonitoringService::new(
            settings,
            (0..12).map(row).collect(),
            Arc::new(DescriptiveEngine::default()),
            Registry::new(),
            LogContext::new("r", "h"),
        );
        assert!(matches!(
            result,
            Err(Error::ReferenceTooSmall {
                rows: 7,
                required: 10
            })
        ));
    }

    #[test]
    fn replace_reference_checks_schema_and_size() {
        let (svc, _) = service(2, (0..6).map(row).collect());
        let before = svc.status().reference_fingerprint;
        assert!(svc
            .replace_reference(vec![Record::new().with("y", 1.0)])
            .is_err());
        let after = svc.replace_reference((10..20).map(row).collect()).unwrap();
        assert_ne!(before, after);
        assert_eq!(svc.status().reference_rows, 10);
        let metrics = svc.render_metrics().unwrap();
        assert!(metrics.contains(&format!("hash=\"{}\"}} 0", before)));
        assert!(metrics.contains(&format!("hash=\"{}\"}} 1", after)));
    }
}
