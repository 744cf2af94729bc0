//! Seam between the window controller and the statistical tests.

use dm_common::Record;
use dm_config::ColumnMapping;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// One named (optionally labeled) numeric result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        MetricSample {
            name: name.into(),
            value,
            labels: None,
        }
    }

    pub fn labeled<K, V>(
        name: impl Into<String>,
        value: f64,
        labels: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        MetricSample {
            name: name.into(),
            value,
            labels: Some(
                labels
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

/// Why an evaluation produced no results.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Failed(String),

    #[error("evaluation exceeded {0:?}")]
    Timeout(Duration),

    #[error("evaluation worker panicked")]
    Panicked,
}

impl From<EngineError> for dm_common::Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Timeout(after) => dm_common::Error::EvaluationTimeout {
                seconds: after.as_secs(),
            },
            other => dm_common::Error::Evaluation(other.to_string()),
        }
    }
}

/// Compares the current window against the reference.
///
/// Implementations must be pure with respect to their inputs; the service
/// may call them from a worker thread.
pub trait StatisticalEngine: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str {
        "engine"
    }

    fn evaluate(
        &self,
        reference: &[Record],
        current: &[Record],
        mapping: &ColumnMapping,
    ) -> Result<Vec<MetricSample>, EngineError>;
}

/// Runs `engine`, bounded by a deadline when one is set.
///
/// With a deadline the call runs on a worker thread. A worker that misses
/// the deadline is abandoned, not cancelled; its result is dropped. At most
/// one worker is alive at a time: while an abandoned one is still running,
/// further evaluations fail without spawning.
#[derive(Debug, Default)]
pub struct EvaluationRunner {
    busy: Arc<AtomicBool>,
}

/// Clears the busy flag when the worker ends, panicking or not.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl EvaluationRunner {
    pub fn new() -> Self {
        EvaluationRunner::default()
    }

    /// Whether a worker thread is still running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn run(
        &self,
        engine: &Arc<dyn StatisticalEngine>,
        reference: Arc<[Record]>,
        current: Vec<Record>,
        mapping: &ColumnMapping,
        deadline: Option<Duration>,
    ) -> Result<Vec<MetricSample>, EngineError> {
        let Some(deadline) = deadline else {
            return engine.evaluate(&reference, &current, mapping);
        };

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::Failed(
                "previous evaluation still running".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel();
        let engine = Arc::clone(engine);
        let mapping = mapping.clone();
        let busy = Arc::clone(&self.busy);
        let spawned = thread::Builder::new()
            .name("dm-evaluate".to_string())
            .spawn(move || {
                let _busy = BusyGuard(busy);
                let result = engine.evaluate(&reference, &current, &mapping);
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            self.busy.store(false, Ordering::Release);
            return Err(EngineError::Failed(format!(
                "failed to spawn evaluation worker: {}",
                e
            )));
        }

        match rx.recv_timeout(deadline) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(EngineError::Timeout(deadline)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(EngineError::Panicked),
        }
    }
}
