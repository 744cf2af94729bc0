//! The `service` section: window sizing, reference seeding and cadence.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Statistical test groups a monitor can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    DataDrift,
    ConceptDrift,
    RegressionPerformance,
}

impl MonitorKind {
    /// Every group, in declaration order.
    pub const ALL: [MonitorKind; 3] = [
        MonitorKind::DataDrift,
        MonitorKind::ConceptDrift,
        MonitorKind::RegressionPerformance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorKind::DataDrift => "data_drift",
            MonitorKind::ConceptDrift => "concept_drift",
            MonitorKind::RegressionPerformance => "regression_performance",
        }
    }
}

impl std::fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options controlling the sliding window and its evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOptions {
    /// Historical dataset (CSV). Relative paths resolve against the config
    /// file's directory.
    pub reference_path: PathBuf,

    /// Minimum rows the reference must keep after seeding.
    #[serde(default)]
    pub min_reference_size: usize,

    /// Seed the window with the last `window_size` historical rows.
    #[serde(default = "default_true")]
    pub use_reference: bool,

    /// Replace the reference with each successfully evaluated window.
    #[serde(default)]
    pub moving_reference: bool,

    /// Target window length.
    pub window_size: usize,

    /// Minimum seconds between evaluations; 0 evaluates on every full cycle.
    #[serde(default)]
    pub calculation_period_sec: u64,

    /// Test groups the statistical engine runs; an unlisted group publishes nothing.
    #[serde(default)]
    pub monitors: Vec<MonitorKind>,

    /// Deadline for one engine call.
    #[serde(default)]
    pub evaluation_timeout_sec: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl ServiceOptions {
    /// Throttle interval, if one is configured.
    pub fn calculation_period(&self) -> Option<Duration> {
        (self.calculation_period_sec > 0).then(|| Duration::from_secs(self.calculation_period_sec))
    }

    pub fn evaluation_timeout(&self) -> Option<Duration> {
        self.evaluation_timeout_sec.map(Duration::from_secs)
    }
}
