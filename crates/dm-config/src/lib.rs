//! Drift monitor configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for the monitor configuration file
//! - Config resolution (CLI → env → working dir → XDG → /etc)
//! - YAML, TOML and JSON parsing chosen by file extension
//! - Semantic validation
//! - Config snapshots for startup logs

pub mod mapping;
pub mod resolve;
pub mod server;
pub mod service;
pub mod snapshot;
pub mod validate;

pub use mapping::{ColumnMapping, DataFormat};
pub use resolve::{resolve_config_path, ConfigPath, ConfigSource};
pub use server::{MetricsOptions, ServerConfig};
pub use service::{MonitorKind, ServiceOptions};
pub use snapshot::ConfigSnapshot;
pub use validate::{validate_config, ValidationError, ValidationResult};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration file found (searched: {searched:?})")]
    NotFound { searched: Vec<PathBuf> },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported config format for {path} (expected .yaml, .yml, .toml or .json)")]
    UnsupportedFormat { path: PathBuf },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
}

/// On-disk configuration formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            "toml" => Some(ConfigFormat::Toml),
            "json" => Some(ConfigFormat::Json),
            _ => None,
        }
    }
}

/// The whole monitor configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub data_format: DataFormat,

    #[serde(default)]
    pub column_mapping: ColumnMapping,

    /// Pretty-print JSON responses and reports.
    #[serde(default)]
    pub pretty_print: bool,

    pub service: ServiceOptions,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub metrics: MetricsOptions,
}

impl MonitorConfig {
    /// Parse configuration content in the given format (no validation).
    pub fn parse_str(content: &str, format: ConfigFormat) -> Result<Self, String> {
        match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| format!("failed to parse yaml config: {}", e)),
            ConfigFormat::Toml => {
                toml::from_str(content).map_err(|e| format!("failed to parse toml config: {}", e))
            }
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| format!("failed to parse json config: {}", e)),
        }
    }

    /// Read, parse and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let (config, _) = read_config(path)?;
        Ok(config)
    }

    /// The column holding timestamps, from `data_format` or the mapping.
    pub fn date_column(&self) -> Option<&str> {
        self.data_format
            .date_column
            .as_deref()
            .or(self.column_mapping.datetime.as_deref())
    }
}

/// Configuration resolution options.
#[derive(Debug, Default)]
pub struct ConfigOptions {
    /// Explicit config file (highest priority).
    pub config_path: Option<PathBuf>,
}

/// Loaded configuration with provenance information.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: MonitorConfig,
    /// The file the configuration came from.
    pub path: PathBuf,
    pub source: ConfigSource,
    pub snapshot: ConfigSnapshot,
}

impl ResolvedConfig {
    /// The reference dataset path, resolved against the config file's directory.
    pub fn reference_path(&self) -> PathBuf {
        let reference = &self.config.service.reference_path;
        if reference.is_absolute() {
            return reference.clone();
        }
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(reference),
            _ => reference.clone(),
        }
    }
}

/// Load configuration with the standard resolution order.
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    let resolved = resolve_config_path(options.config_path.as_deref());
    let Some(path) = resolved.path else {
        return Err(ConfigError::NotFound {
            searched: resolved.searched,
        });
    };

    let (config, content) = read_config(&path)?;
    let snapshot = ConfigSnapshot::new(&config, Some(&path), resolved.source, &content);

    Ok(ResolvedConfig {
        config,
        path,
        source: resolved.source,
        snapshot,
    })
}

fn read_config(path: &Path) -> Result<(MonitorConfig, String), ConfigError> {
    let format = ConfigFormat::from_path(path).ok_or_else(|| ConfigError::UnsupportedFormat {
        path: path.to_path_buf(),
    })?;

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config =
        MonitorConfig::parse_str(&content, format).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;

    validate_config(&config)?;
    Ok((config, content))
}
