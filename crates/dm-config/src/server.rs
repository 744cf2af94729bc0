//! The `server` and `metrics` sections.

use serde::{Deserialize, Serialize};

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default: 127.0.0.1).
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port (default: 5000).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Ingestion path (default: /iterate).
    #[serde(default = "default_iterate_path")]
    pub iterate_path: String,
    /// Scrape path (default: /metrics).
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_iterate_path() -> String {
    "/iterate".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            iterate_path: default_iterate_path(),
            metrics_path: default_metrics_path(),
        }
    }
}

/// Naming of published metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsOptions {
    /// Prepended to every metric name.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "drift_monitor_".to_string()
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}
