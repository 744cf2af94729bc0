//! Configuration path discovery.
//!
//! Resolution order: CLI argument → environment variables → working
//! directory → XDG config → /etc.

use std::path::{Path, PathBuf};

/// Where the configuration file was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// `config.yaml` in the working directory.
    WorkingDirectory,

    /// Found in XDG config directory.
    XdgConfig,

    /// Found in /etc/drift-monitor/.
    SystemConfig,

    /// Nothing found.
    #[default]
    NotFound,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::WorkingDirectory => write!(f, "working directory"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::SystemConfig => write!(f, "system config"),
            ConfigSource::NotFound => write!(f, "not found"),
        }
    }
}

/// Outcome of path resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigPath {
    /// The file to load, if any candidate exists.
    pub path: Option<PathBuf>,
    /// Where it came from.
    pub source: ConfigSource,
    /// Every candidate that was tried, in order (for diagnostics).
    pub searched: Vec<PathBuf>,
}

/// Environment variable names.
pub const ENV_CONFIG_PATH: &str = "DRIFT_MONITOR_CONFIG";
pub const ENV_CONFIG_DIR: &str = "DRIFT_MONITOR_CONFIG_DIR";

/// Standard config file name.
pub const CONFIG_FILENAME: &str = "config.yaml";

/// Application name for XDG directories.
const APP_NAME: &str = "drift-monitor";

/// Resolve the configuration file path.
///
/// 1. Explicit CLI path (used even if it does not exist, so the error names it)
/// 2. `DRIFT_MONITOR_CONFIG`
/// 3. `DRIFT_MONITOR_CONFIG_DIR` + `config.yaml`
/// 4. `./config.yaml`
/// 5. XDG config directory (~/.config/drift-monitor/config.yaml)
/// 6. /etc/drift-monitor/config.yaml
pub fn resolve_config_path(cli_path: Option<&Path>) -> ConfigPath {
    let mut resolved = ConfigPath::default();

    if let Some(path) = cli_path {
        resolved.searched.push(path.to_path_buf());
        resolved.path = Some(path.to_path_buf());
        resolved.source = ConfigSource::CliArgument;
        return resolved;
    }

    let mut candidates: Vec<(PathBuf, ConfigSource)> = Vec::new();
    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        candidates.push((PathBuf::from(env_path), ConfigSource::Environment));
    }
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        candidates.push((
            PathBuf::from(dir).join(CONFIG_FILENAME),
            ConfigSource::Environment,
        ));
    }
    candidates.push((PathBuf::from(CONFIG_FILENAME), ConfigSource::WorkingDirectory));
    if let Some(dir) = xdg_config_dir() {
        candidates.push((dir.join(CONFIG_FILENAME), ConfigSource::XdgConfig));
    }
    candidates.push((
        system_config_dir().join(CONFIG_FILENAME),
        ConfigSource::SystemConfig,
    ));

    for (path, source) in candidates {
        resolved.searched.push(path.clone());
        if path.is_file() {
            resolved.path = Some(path);
            resolved.source = source;
            return resolved;
        }
    }

    resolved
}

/// Get the XDG config directory for the drift monitor.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Get the system config directory.
pub fn system_config_dir() -> PathBuf {
    PathBuf::from("/etc").join(APP_NAME)
}
