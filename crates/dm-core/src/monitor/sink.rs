//! Republishes engine results as overwritable Prometheus gauges.
//!
//! A metric's identity is fixed the first time its name is seen: a plain
//! gauge when published without labels, otherwise a gauge vector keyed by
//! the sorted label names of that first sample. Later samples must match
//! that shape.

use dm_common::{Error, Result};
use prometheus::{Gauge, GaugeVec, Opts, Registry};
use std::collections::{BTreeMap, HashMap};

use super::engine::MetricSample;
use super::reference::Fingerprint;

/// Name of the reference fingerprint metric, before the prefix.
pub const REFERENCE_HASH_METRIC: &str = "reference_dataset_hash";

const HELP: &str = "Drift monitor evaluation result";

enum MetricHandle {
    Scalar(Gauge),
    Labeled { vec: GaugeVec, keys: Vec<String> },
}

impl MetricHandle {
    fn keys(&self) -> &[String] {
        match self {
            MetricHandle::Scalar(_) => &[],
            MetricHandle::Labeled { keys, .. } => keys,
        }
    }
}

/// Outcome of publishing one evaluation's samples.
#[derive(Debug, Default)]
pub struct PublishReport {
    pub written: usize,
    pub rejected: Vec<Error>,
}

/// Lazily registers one gauge (or gauge vector) per metric name.
pub struct MetricSink {
    registry: Registry,
    prefix: String,
    handles: HashMap<String, MetricHandle>,
    demoted_hash: Option<Fingerprint>,
}

impl MetricSink {
    pub fn new(registry: Registry, prefix: impl Into<String>) -> Self {
        MetricSink {
            registry,
            prefix: prefix.into(),
            handles: HashMap::new(),
            demoted_hash: None,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Full exposition name for a sample name.
    pub fn metric_name(&self, name: &str) -> String {
        sanitize_metric_name(&format!("{}{}", self.prefix, name))
    }

    /// Number of metric identities created so far.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Set `name` (optionally labeled) to `value`.
    ///
    /// An empty label map is the same as no labels. Label names that
    /// collide once sanitized, and any shape mismatch, write nothing.
    pub fn publish(
        &mut self,
        name: &str,
        value: f64,
        labels: Option<&BTreeMap<String, String>>,
    ) -> Result<()> {
        let full_name = self.metric_name(name);
        let given = labels;
        let labels: BTreeMap<String, &str> = labels
            .into_iter()
            .flatten()
            .map(|(k, v)| (sanitize_label_name(k), v.as_str()))
            .collect();
        let keys: Vec<String> = labels.keys().cloned().collect();
        if let Some(given) = given.filter(|given| given.len() != keys.len()) {
            return Err(Error::LabelShapeMismatch {
                metric: full_name,
                expected: given.keys().cloned().collect(),
                actual: keys,
            });
        }

        if !self.handles.contains_key(&full_name) {
            let handle = self.register(&full_name, &keys)?;
            self.handles.insert(full_name.clone(), handle);
        }
        let Some(handle) = self.handles.get(&full_name) else {
            return Err(Error::Metrics(format!("{} vanished after registration", full_name)));
        };

        if handle.keys() != keys.as_slice() {
            return Err(Error::LabelShapeMismatch {
                metric: full_name,
                expected: handle.keys().to_vec(),
                actual: keys,
            });
        }

        match handle {
            MetricHandle::Scalar(gauge) => gauge.set(value),
            MetricHandle::Labeled { vec, .. } => {
                let values: Vec<&str> = labels.values().copied().collect();
                vec.get_metric_with_label_values(&values)
                    .map_err(|e| Error::Metrics(e.to_string()))?
                    .set(value);
            }
        }
        Ok(())
    }

    /// Publish every sample, collecting per-sample failures.
    pub fn publish_all(&mut self, samples: &[MetricSample]) -> PublishReport {
        let mut report = PublishReport::default();
        for sample in samples {
            match self.publish(&sample.name, sample.value, sample.labels.as_ref()) {
                Ok(()) => report.written += 1,
                Err(e) => report.rejected.push(e),
            }
        }
        report
    }

    /// Mark `current` as the active reference, demoting `previous` to 0.
    ///
    /// Only the latest demoted fingerprint is kept; older ones are removed,
    /// so the metric holds at most two series.
    pub fn publish_reference_hash(
        &mut self,
        previous: Option<&Fingerprint>,
        current: &Fingerprint,
    ) -> Result<()> {
        if let Some(previous) = previous.filter(|p| *p != current) {
            self.publish(REFERENCE_HASH_METRIC, 0.0, Some(&hash_labels(previous)))?;
            if let Some(stale) = self.demoted_hash.replace(previous.clone()) {
                if stale != *previous && stale != *current {
                    self.remove_series(REFERENCE_HASH_METRIC, &[stale.as_str()]);
                }
            }
        }
        self.publish(REFERENCE_HASH_METRIC, 1.0, Some(&hash_labels(current)))
    }

    fn remove_series(&self, name: &str, values: &[&str]) {
        let full_name = self.metric_name(name);
        if let Some(MetricHandle::Labeled { vec, .. }) = self.handles.get(&full_name) {
            // Err only when the series is already gone.
            let _ = vec.remove_label_values(values);
        }
    }

    fn register(&self, full_name: &str, keys: &[String]) -> Result<MetricHandle> {
        let opts = Opts::new(full_name, HELP);
        let handle = if keys.is_empty() {
            let gauge = Gauge::with_opts(opts).map_err(|e| Error::Metrics(e.to_string()))?;
            self.registry
                .register(Box::new(gauge.clone()))
                .map_err(|e| Error::Metrics(format!("{}: {}", full_name, e)))?;
            MetricHandle::Scalar(gauge)
        } else {
            let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            let vec = GaugeVec::new(opts, &key_refs).map_err(|e| Error::Metrics(e.to_string()))?;
            self.registry
                .register(Box::new(vec.clone()))
                .map_err(|e| Error::Metrics(format!("{}: {}", full_name, e)))?;
            MetricHandle::Labeled {
                vec,
                keys: keys.to_vec(),
            }
        };
        Ok(handle)
    }
}

fn hash_labels(fingerprint: &Fingerprint) -> BTreeMap<String, String> {
    BTreeMap::from([("hash".to_string(), fingerprint.to_string())])
}

/// Map a name onto `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn sanitize_metric_name(name: &str) -> String {
    sanitize(name, true)
}

/// Map a label name onto `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn sanitize_label_name(name: &str) -> String {
    sanitize(name, false)
}

fn sanitize(name: &str, allow_colon: bool) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || (allow_colon && c == ':') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}
