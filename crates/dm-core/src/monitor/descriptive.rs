//! Built-in engine publishing descriptive statistics.
//!
//! Not a drift test: it reports simple summaries per configured monitor
//! group, so the service produces useful output with no test library
//! plugged in.
//!
//! - `data_drift`: per-feature means, mean shift and null fractions
//! - `concept_drift`: target mean per dataset and its shift
//! - `regression_performance`: mean error and mean absolute error of the
//!   prediction against the target
//!
//! `dataset_rows{dataset}` is published whatever the groups.

use dm_common::{Record, Value};
use dm_config::{ColumnMapping, MonitorKind};
use std::collections::BTreeSet;

use super::engine::{EngineError, MetricSample, StatisticalEngine};

#[derive(Debug, Clone)]
pub struct DescriptiveEngine {
    monitors: Vec<MonitorKind>,
}

impl Default for DescriptiveEngine {
    /// All monitor groups enabled.
    fn default() -> Self {
        DescriptiveEngine::new(&MonitorKind::ALL)
    }
}

impl DescriptiveEngine {
    pub fn new(monitors: &[MonitorKind]) -> Self {
        DescriptiveEngine {
            monitors: monitors.to_vec(),
        }
    }

    fn runs(&self, kind: MonitorKind) -> bool {
        self.monitors.contains(&kind)
    }
}

impl StatisticalEngine for DescriptiveEngine {
    fn name(&self) -> &str {
        "descriptive"
    }

    fn evaluate(
        &self,
        reference: &[Record],
        current: &[Record],
        mapping: &ColumnMapping,
    ) -> Result<Vec<MetricSample>, EngineError> {
        let mut samples = vec![
            MetricSample::labeled("dataset_rows", reference.len() as f64, [("dataset", "reference")]),
            MetricSample::labeled("dataset_rows", current.len() as f64, [("dataset", "current")]),
        ];

        if self.runs(MonitorKind::DataDrift) {
            data_drift(reference, current, mapping, &mut samples);
        }
        if self.runs(MonitorKind::ConceptDrift) {
            concept_drift(reference, current, mapping, &mut samples);
        }
        if self.runs(MonitorKind::RegressionPerformance) {
            regression_performance(reference, current, mapping, &mut samples);
        }

        Ok(samples)
    }
}

fn data_drift(
    reference: &[Record],
    current: &[Record],
    mapping: &ColumnMapping,
    samples: &mut Vec<MetricSample>,
) {
    let (numeric, all) = feature_columns(reference, current, mapping);

    for column in &numeric {
        let ref_mean = mean(reference, column);
        let cur_mean = mean(current, column);
        for (dataset, value) in [("reference", ref_mean), ("current", cur_mean)] {
            if let Some(value) = value {
                samples.push(MetricSample::labeled(
                    "column_mean",
                    value,
                    [("dataset", dataset), ("column", column.as_str())],
                ));
            }
        }
        if let (Some(r), Some(c)) = (ref_mean, cur_mean) {
            samples.push(MetricSample::labeled(
                "column_mean_shift",
                c - r,
                [("column", column.as_str())],
            ));
        }
    }

    for column in &all {
        for (dataset, rows) in [("reference", reference), ("current", current)] {
            if let Some(fraction) = null_fraction(rows, column) {
                samples.push(MetricSample::labeled(
                    "column_null_fraction",
                    fraction,
                    [("dataset", dataset), ("column", column.as_str())],
                ));
            }
        }
    }
}

fn concept_drift(
    reference: &[Record],
    current: &[Record],
    mapping: &ColumnMapping,
    samples: &mut Vec<MetricSample>,
) {
    let Some(target) = mapping.target.as_deref() else {
        return;
    };
    let ref_mean = mean(reference, target);
    let cur_mean = mean(current, target);
    for (dataset, value) in [("reference", ref_mean), ("current", cur_mean)] {
        if let Some(value) = value {
            samples.push(MetricSample::labeled("target_mean", value, [("dataset", dataset)]));
        }
    }
    if let (Some(r), Some(c)) = (ref_mean, cur_mean) {
        samples.push(MetricSample::new("target_mean_shift", c - r));
    }
}

fn regression_performance(
    reference: &[Record],
    current: &[Record],
    mapping: &ColumnMapping,
    samples: &mut Vec<MetricSample>,
) {
    let (Some(target), Some(prediction)) =
        (mapping.target.as_deref(), mapping.prediction.as_deref())
    else {
        return;
    };
    for (dataset, rows) in [("reference", reference), ("current", current)] {
        let errors: Vec<f64> = rows
            .iter()
            .filter_map(|r| {
                let actual = r.get(target).and_then(Value::as_f64)?;
                let predicted = r.get(prediction).and_then(Value::as_f64)?;
                Some(predicted - actual)
            })
            .collect();
        if errors.is_empty() {
            continue;
        }
        let n = errors.len() as f64;
        let me = errors.iter().sum::<f64>() / n;
        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
        samples.push(MetricSample::labeled("mean_error", me, [("dataset", dataset)]));
        samples.push(MetricSample::labeled("mean_absolute_error", mae, [("dataset", dataset)]));
    }
}

/// Numeric feature columns to average and every feature column to
/// null-check.
///
/// Mapped features are used when the mapping lists any; otherwise every
/// column of the data except target, prediction and datetime, with numeric
/// ones detected from the values.
fn feature_columns(
    reference: &[Record],
    current: &[Record],
    mapping: &ColumnMapping,
) -> (BTreeSet<String>, BTreeSet<String>) {
    let listed: BTreeSet<String> = mapping
        .numerical_features
        .iter()
        .chain(&mapping.categorical_features)
        .cloned()
        .collect();

    let all: BTreeSet<String> = if listed.is_empty() {
        let roles: BTreeSet<&str> = mapping
            .target
            .as_deref()
            .into_iter()
            .chain(mapping.prediction.as_deref())
            .chain(mapping.datetime.as_deref())
            .collect();
        current
            .iter()
            .chain(reference)
            .flat_map(|r| r.columns())
            .filter(|c| !roles.contains(c))
            .map(str::to_string)
            .collect()
    } else {
        listed
    };

    let categorical: BTreeSet<&str> = mapping
        .categorical_features
        .iter()
        .map(String::as_str)
        .collect();

    let numeric = all
        .iter()
        .filter(|c| !categorical.contains(c.as_str()))
        .filter(|c| is_numeric(current, c) || is_numeric(reference, c))
        .cloned()
        .collect();

    (numeric, all)
}

fn is_numeric(rows: &[Record], column: &str) -> bool {
    let mut seen = false;
    for value in rows.iter().filter_map(|r| r.get(column)) {
        match value {
            Value::Null => {}
            Value::Number(_) => seen = true,
            _ => return false,
        }
    }
    seen
}

fn mean(rows: &[Record], column: &str) -> Option<f64> {
    let (sum, n) = rows
        .iter()
        .filter_map(|r| r.get(column).and_then(Value::as_f64))
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn null_fraction(rows: &[Record], column: &str) -> Option<f64> {
    if rows.is_empty() {
        return None;
    }
    let nulls = rows
        .iter()
        .filter(|r| r.get(column).map_or(true, Value::is_null))
        .count();
    Some(nulls as f64 / rows.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample<'a>(
        samples: &'a [MetricSample],
        name: &str,
        labels: &[(&str, &str)],
    ) -> Option<&'a MetricSample> {
        samples.iter().find(|s| {
            s.name == name
                && labels.iter().all(|(k, v)| {
                    s.labels
                        .as_ref()
                        .and_then(|l| l.get(*k))
                        .map(String::as_str)
                        == Some(*v)
                })
        })
    }

    fn names(samples: &[MetricSample]) -> BTreeSet<&str> {
        samples.iter().map(|s| s.name.as_str()).collect()
    }

    fn regression_rows() -> (Vec<Record>, Vec<Record>, ColumnMapping) {
        let reference = vec![
            Record::new().with("f", 1.0).with("y", 10.0).with("p", 11.0),
            Record::new().with("f", 3.0).with("y", 20.0).with("p", 19.0),
        ];
        let current = vec![
            Record::new().with("f", 5.0).with("y", 30.0).with("p", 34.0),
            Record::new().with("f", 7.0).with("y", 40.0).with("p", 42.0),
        ];
        let mapping = ColumnMapping {
            target: Some("y".into()),
            prediction: Some("p".into()),
            ..ColumnMapping::default()
        };
        (reference, current, mapping)
    }

    #[test]
    fn reports_counts_means_and_nulls() {
        let reference = vec![
            Record::new().with("x", 1.0).with("cat", "a"),
            Record::new().with("x", 3.0).with("cat", "b"),
        ];
        let current = vec![
            Record::new().with("x", 10.0).with("cat", "a"),
            Record::new().with("x", Value::Null).with("cat", "a"),
        ];
        let out = DescriptiveEngine::default()
            .evaluate(&reference, &current, &ColumnMapping::default())
            .unwrap();

        assert_eq!(sample(&out, "dataset_rows", &[("dataset", "current")]).unwrap().value, 2.0);
        assert_eq!(
            sample(&out, "column_mean", &[("dataset", "reference"), ("column", "x")]).unwrap().value,
            2.0
        );
        assert_eq!(
            sample(&out, "column_mean", &[("dataset", "current"), ("column", "x")]).unwrap().value,
            10.0
        );
        assert_eq!(sample(&out, "column_mean_shift", &[("column", "x")]).unwrap().value, 8.0);
        assert_eq!(
            sample(&out, "column_null_fraction", &[("dataset", "current"), ("column", "x")])
                .unwrap()
                .value,
            0.5
        );
        assert!(sample(&out, "column_mean", &[("column", "cat")]).is_none());
    }

    #[test]
    fn listed_features_restrict_columns() {
        let rows = vec![Record::new().with("x", 1.0).with("y", 2.0).with("z", 3.0)];
        let mapping = ColumnMapping {
            target: Some("y".into()),
            numerical_features: vec!["x".into()],
            ..ColumnMapping::default()
        };
        let out = DescriptiveEngine::default().evaluate(&rows, &rows, &mapping).unwrap();
        assert!(sample(&out, "column_mean", &[("column", "x")]).is_some());
        assert!(sample(&out, "column_mean", &[("column", "y")]).is_none());
        assert!(sample(&out, "column_mean", &[("column", "z")]).is_none());
        assert_eq!(sample(&out, "target_mean", &[("dataset", "current")]).unwrap().value, 2.0);
    }

    #[test]
    fn target_and_prediction_are_not_features() {
        let (reference, current, mapping) = regression_rows();
        let out = DescriptiveEngine::default()
            .evaluate(&reference, &current, &mapping)
            .unwrap();
        assert!(sample(&out, "column_mean", &[("column", "f")]).is_some());
        assert!(sample(&out, "column_mean", &[("column", "y")]).is_none());
        assert!(sample(&out, "column_mean", &[("column", "p")]).is_none());
    }

    #[test]
    fn concept_drift_tracks_target_mean() {
        let (reference, current, mapping) = regression_rows();
        let out = DescriptiveEngine::new(&[MonitorKind::ConceptDrift])
            .evaluate(&reference, &current, &mapping)
            .unwrap();
        assert_eq!(sample(&out, "target_mean", &[("dataset", "reference")]).unwrap().value, 15.0);
        assert_eq!(sample(&out, "target_mean", &[("dataset", "current")]).unwrap().value, 35.0);
        assert_eq!(sample(&out, "target_mean_shift", &[]).unwrap().value, 20.0);
    }

    #[test]
    fn regression_errors_per_dataset() {
        let (reference, current, mapping) = regression_rows();
        let out = DescriptiveEngine::new(&[MonitorKind::RegressionPerformance])
            .evaluate(&reference, &current, &mapping)
            .unwrap();
        assert_eq!(sample(&out, "mean_error", &[("dataset", "reference")]).unwrap().value, 0.0);
        assert_eq!(
            sample(&out, "mean_absolute_error", &[("dataset", "reference")]).unwrap().value,
            1.0
        );
        assert_eq!(sample(&out, "mean_error", &[("dataset", "current")]).unwrap().value, 3.0);
        assert_eq!(
            sample(&out, "mean_absolute_error", &[("dataset", "current")]).unwrap().value,
            3.0
        );
    }

    #[test]
    fn unlisted_groups_publish_nothing() {
        let (reference, current, mapping) = regression_rows();

        let out = DescriptiveEngine::new(&[MonitorKind::DataDrift])
            .evaluate(&reference, &current, &mapping)
            .unwrap();
        let published = names(&out);
        assert!(published.contains("column_mean"));
        assert!(!published.contains("target_mean"));
        assert!(!published.contains("mean_absolute_error"));

        let out = DescriptiveEngine::new(&[])
            .evaluate(&reference, &current, &mapping)
            .unwrap();
        assert_eq!(names(&out), BTreeSet::from(["dataset_rows"]));
    }

    #[test]
    fn groups_need_their_columns_mapped() {
        let (reference, current, _) = regression_rows();
        let out = DescriptiveEngine::default()
            .evaluate(&reference, &current, &ColumnMapping::default())
            .unwrap();
        let published = names(&out);
        assert!(!published.contains("target_mean"));
        assert!(!published.contains("mean_error"));
    }

    #[test]
    fn empty_reference_skips_shift() {
        let current = vec![Record::new().with("x", 1.0)];
        let out = DescriptiveEngine::default()
            .evaluate(&[], &current, &ColumnMapping::default())
            .unwrap();
        assert!(sample(&out, "column_mean_shift", &[]).is_none());
        assert_eq!(sample(&out, "dataset_rows", &[("dataset", "reference")]).unwrap().value, 0.0);
    }
}
