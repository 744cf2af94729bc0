//! Semantic validation for the monitor configuration.
//!
//! Serde guarantees shape and types; this module checks the values make
//! sense together (non-zero window, usable separator, routable paths).

use std::collections::HashSet;
use thiserror::Error;

use crate::MonitorConfig;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("service.window_size must be positive")]
    WindowSizeZero,

    #[error("service.reference_path must not be empty")]
    EmptyReferencePath,

    #[error("data_format.separator must be a single byte (got {value:?})")]
    InvalidSeparator { value: String },

    #[error("service.monitors lists {monitor} more than once")]
    DuplicateMonitor { monitor: String },

    #[error("service.evaluation_timeout_sec must be positive when set")]
    TimeoutZero,

    #[error("server.port must be non-zero")]
    PortZero,

    #[error("{field} must be an absolute URL path (got {value:?})")]
    InvalidPath { field: String, value: String },

    #[error("server.iterate_path and server.metrics_path must differ (both {value:?})")]
    PathCollision { value: String },

    #[error("metrics.prefix {value:?} is not a valid metric name prefix")]
    InvalidPrefix { value: String },

    #[error("column_mapping names {column} in more than one role")]
    ColumnRoleConflict { column: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::WindowSizeZero => 70,
            ValidationError::EmptyReferencePath => 71,
            ValidationError::InvalidSeparator { .. } => 72,
            ValidationError::DuplicateMonitor { .. } => 73,
            ValidationError::TimeoutZero => 74,
            ValidationError::PortZero => 75,
            ValidationError::InvalidPath { .. } => 76,
            ValidationError::PathCollision { .. } => 77,
            ValidationError::InvalidPrefix { .. } => 78,
            ValidationError::ColumnRoleConflict { .. } => 79,
            ValidationError::InvalidValue { .. } => 80,
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &MonitorConfig) -> ValidationResult<()> {
    let service = &config.service;

    if service.window_size == 0 {
        return Err(ValidationError::WindowSizeZero);
    }
    if service.reference_path.as_os_str().is_empty() {
        return Err(ValidationError::EmptyReferencePath);
    }
    if service.evaluation_timeout_sec == Some(0) {
        return Err(ValidationError::TimeoutZero);
    }

    let mut seen = HashSet::new();
    for monitor in &service.monitors {
        if !seen.insert(*monitor) {
            return Err(ValidationError::DuplicateMonitor {
                monitor: monitor.to_string(),
            });
        }
    }

    if config.data_format.separator_byte().is_none() {
        return Err(ValidationError::InvalidSeparator {
            value: config.data_format.separator.clone(),
        });
    }

    if let (Some(date_column), Some(datetime)) = (
        &config.data_format.date_column,
        &config.column_mapping.datetime,
    ) {
        if date_column != datetime {
            return Err(ValidationError::InvalidValue {
                field: "data_format.date_column".to_string(),
                message: format!(
                    "{:?} disagrees with column_mapping.datetime {:?}",
                    date_column, datetime
                ),
            });
        }
    }

    let mut roles = HashSet::new();
    for column in config.column_mapping.named_columns() {
        if !roles.insert(column) {
            return Err(ValidationError::ColumnRoleConflict {
                column: column.to_string(),
            });
        }
    }

    validate_server(config)?;

    if !is_valid_prefix(&config.metrics.prefix) {
        return Err(ValidationError::InvalidPrefix {
            value: config.metrics.prefix.clone(),
        });
    }

    Ok(())
}

fn validate_server(config: &MonitorConfig) -> ValidationResult<()> {
    let server = &config.server;
    if server.port == 0 {
        return Err(ValidationError::PortZero);
    }
    for (field, value) in [
        ("server.iterate_path", &server.iterate_path),
        ("server.metrics_path", &server.metrics_path),
    ] {
        if !value.starts_with('/') || value.contains(char::is_whitespace) {
            return Err(ValidationError::InvalidPath {
                field: field.to_string(),
                value: value.clone(),
            });
        }
    }
    if server.iterate_path == server.metrics_path {
        return Err(ValidationError::PathCollision {
            value: server.iterate_path.clone(),
        });
    }
    Ok(())
}

/// Metric names follow `[a-zA-Z_:][a-zA-Z0-9_:]*`; an empty prefix is allowed.
fn is_valid_prefix(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    match chars.next() {
        None => true,
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        }
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> MonitorConfig {
        MonitorConfig::parse_str(
            r#"{"service": {"reference_path": "ref.csv", "window_size": 30}}"#,
            crate::ConfigFormat::Json,
        )
        .unwrap()
    }

    #[test]
    fn test_base_is_valid() {
        assert!(validate_config(&base()).is_ok());
    }

    #[test]
    fn test_zero_window() {
        let mut config = base();
        config.service.window_size = 0;
        assert_eq!(validate_config(&config), Err(ValidationError::WindowSizeZero));
    }

    #[test]
    fn test_bad_separator() {
        let mut config = base();
        config.data_format.separator = ",,".into();
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::InvalidSeparator { .. })
        ));
    }

    #[test]
    fn test_zero_timeout() {
        let mut config = base();
        config.service.evaluation_timeout_sec = Some(0);
        assert_eq!(validate_config(&config), Err(ValidationError::TimeoutZero));
    }

    #[test]
    fn test_duplicate_monitor() {
        let mut config = base();
        config.service.monitors = vec![
            crate::MonitorKind::DataDrift,
            crate::MonitorKind::DataDrift,
        ];
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::DuplicateMonitor { .. })
        ));
    }

    #[test]
    fn test_path_rules() {
        let mut config = base();
        config.server.iterate_path = "iterate".into();
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::InvalidPath { .. })
        ));

        let mut config = base();
        config.server.iterate_path = "/metrics".into();
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::PathCollision { .. })
        ));
    }

    #[test]
    fn test_prefix_rules() {
        assert!(is_valid_prefix(""));
        assert!(is_valid_prefix("drift_monitor_"));
        assert!(is_valid_prefix("evidently:"));
        assert!(!is_valid_prefix("9lives_"));
        assert!(!is_valid_prefix("drift-monitor_"));
    }

    #[test]
    fn test_column_role_conflict() {
        let mut config = base();
        config.column_mapping.target = Some("y".into());
        config.column_mapping.numerical_features = vec!["x".into(), "y".into()];
        assert_eq!(
            validate_config(&config),
            Err(ValidationError::ColumnRoleConflict {
                column: "y".to_string()
            })
        );
    }

    #[test]
    fn test_date_column_disagreement() {
        let mut config = base();
        config.data_format.date_column = Some("date_".into());
        config.column_mapping.datetime = Some("ts".into());
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::InvalidValue { .. })
        ));
    }
}
