//! Configuration snapshots for startup logs and `dm-core check`.
//!
//! A snapshot records which file was loaded, from where, its content hash,
//! and the values that shape the window, so two running monitors can be
//! compared at a glance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::resolve::ConfigSource;
use crate::{MonitorConfig, MonitorKind};

/// A frozen snapshot of configuration state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// When this snapshot was taken.
    pub timestamp: DateTime<Utc>,

    /// Path the configuration was loaded from.
    #[serde(default)]
    pub config_path: Option<String>,

    /// Source of the configuration.
    pub config_source: String,

    /// SHA-256 hash of the configuration file content.
    pub config_hash: String,

    /// Key configuration values for quick reference.
    pub summary: ConfigSummary,
}

/// Summary of the values that drive the window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub reference_path: String,
    pub window_size: usize,
    pub min_reference_size: usize,
    pub use_reference: bool,
    pub moving_reference: bool,
    pub calculation_period_sec: u64,
    pub monitors: Vec<MonitorKind>,
    pub listen: String,
}

impl ConfigSnapshot {
    /// Create a snapshot from a loaded configuration and its raw content.
    pub fn new(
        config: &MonitorConfig,
        path: Option<&std::path::Path>,
        source: ConfigSource,
        content: &str,
    ) -> Self {
        let service = &config.service;
        ConfigSnapshot {
            timestamp: Utc::now(),
            config_path: path.map(|p| p.display().to_string()),
            config_source: source.to_string(),
            config_hash: hash_content(content),
            summary: ConfigSummary {
                reference_path: service.reference_path.display().to_string(),
                window_size: service.window_size,
                min_reference_size: service.min_reference_size,
                use_reference: service.use_reference,
                moving_reference: service.moving_reference,
                calculation_period_sec: service.calculation_period_sec,
                monitors: service.monitors.clone(),
                listen: format!("{}:{}", config.server.bind, config.server.port),
            },
        }
    }
}

/// SHA-256 of content, hex encoded.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
