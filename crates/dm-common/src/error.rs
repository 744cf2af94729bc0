//! Error types for the drift monitor.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for automation
//! - Remediation suggestions for operators
//!
//! # Operator-Facing Output
//!
//! ```text
//! ✗ Schema Mismatch
//!   Reason: batch row 3 does not match the reference schema (missing: [target_])
//!   Fix: Send rows with exactly the reference columns.
//! ```
//!
//! # Machine-Facing Output
//!
//! Errors serialize to structured JSON (used by the HTTP layer):
//! ```json
//! {
//!   "code": 20,
//!   "category": "data",
//!   "message": "batch row 3 does not match the reference schema ...",
//!   "recoverable": true,
//!   "suggested_action": "fix_input",
//!   "context": { "row": 3 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for drift monitor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration and startup errors (config file, reference dataset).
    Config,
    /// Incoming data errors (schema, payload shape).
    Data,
    /// Service lifecycle errors.
    Service,
    /// Statistical evaluation and metric publication errors.
    Evaluation,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Data => write!(f, "data"),
            ErrorCategory::Service => write!(f, "service"),
            ErrorCategory::Evaluation => write!(f, "evaluation"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Suggested actions for automation reacting to errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Retry the operation (possibly with backoff).
    Retry,
    /// Run `dm-core check` against the configuration.
    RunCheck,
    /// Correct the submitted data and resend.
    FixInput,
    /// Wait for the service to finish starting.
    Wait,
    /// Manual intervention required.
    ManualIntervention,
    /// No action needed (informational).
    None,
}

impl std::fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestedAction::Retry => write!(f, "retry"),
            SuggestedAction::RunCheck => write!(f, "run_check"),
            SuggestedAction::FixInput => write!(f, "fix_input"),
            SuggestedAction::Wait => write!(f, "wait"),
            SuggestedAction::ManualIntervention => write!(f, "manual_intervention"),
            SuggestedAction::None => write!(f, "none"),
        }
    }
}

/// Unified error type for the drift monitor.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("reference dataset has {rows} rows, at least {required} required")]
    ReferenceTooSmall { rows: usize, required: usize },

    #[error("failed to load reference dataset: {0}")]
    ReferenceLoad(String),

    // Data errors (20-29)
    #[error(
        "batch row {row} does not match the reference schema (missing: {missing:?}, unexpected: {unexpected:?})"
    )]
    SchemaMismatch {
        row: usize,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    // Service errors (30-39)
    #[error("monitoring service is not initialized yet")]
    NotReady,

    // Evaluation errors (40-49)
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("evaluation timed out after {seconds}s")]
    EvaluationTimeout { seconds: u64 },

    #[error("metric {metric} was registered with labels {expected:?}, got {actual:?}")]
    LabelShapeMismatch {
        metric: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("metric registration failed: {0}")]
    Metrics(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Data errors
    /// - 30-39: Service errors
    /// - 40-49: Evaluation errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::ReferenceTooSmall { .. } => 11,
            Error::ReferenceLoad(_) => 12,
            Error::SchemaMismatch { .. } => 20,
            Error::InvalidBatch(_) => 21,
            Error::NotReady => 30,
            Error::Evaluation(_) => 40,
            Error::EvaluationTimeout { .. } => 41,
            Error::LabelShapeMismatch { .. } => 42,
            Error::Metrics(_) => 43,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::Csv(_) => 62,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::ReferenceTooSmall { .. } | Error::ReferenceLoad(_) => {
                ErrorCategory::Config
            }

            Error::SchemaMismatch { .. } | Error::InvalidBatch(_) => ErrorCategory::Data,

            Error::NotReady => ErrorCategory::Service,

            Error::Evaluation(_)
            | Error::EvaluationTimeout { .. }
            | Error::LabelShapeMismatch { .. }
            | Error::Metrics(_) => ErrorCategory::Evaluation,

            Error::Io(_) | Error::Json(_) | Error::Csv(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether this error is potentially recoverable without a restart.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Startup errors are fatal for the running process
            Error::Config(_) => false,
            Error::ReferenceTooSmall { .. } => false,
            Error::ReferenceLoad(_) => false,

            // Rejected batches can be corrected and resent
            Error::SchemaMismatch { .. } => true,
            Error::InvalidBatch(_) => true,

            Error::NotReady => true,

            // Next cycle may succeed with different data
            Error::Evaluation(_) => true,
            Error::EvaluationTimeout { .. } => true,
            Error::LabelShapeMismatch { .. } => false,
            Error::Metrics(_) => false,

            Error::Io(_) => true,
            Error::Json(_) => true,
            Error::Csv(_) => false,
        }
    }

    /// Returns the suggested action for automation.
    pub fn suggested_action(&self) -> SuggestedAction {
        match self {
            Error::Config(_) => SuggestedAction::RunCheck,
            Error::ReferenceTooSmall { .. } => SuggestedAction::RunCheck,
            Error::ReferenceLoad(_) => SuggestedAction::RunCheck,

            Error::SchemaMismatch { .. } => SuggestedAction::FixInput,
            Error::InvalidBatch(_) => SuggestedAction::FixInput,

            Error::NotReady => SuggestedAction::Wait,

            Error::Evaluation(_) => SuggestedAction::None,
            Error::EvaluationTimeout { .. } => SuggestedAction::None,
            Error::LabelShapeMismatch { .. } => SuggestedAction::ManualIntervention,
            Error::Metrics(_) => SuggestedAction::ManualIntervention,

            Error::Io(_) => SuggestedAction::Retry,
            Error::Json(_) => SuggestedAction::FixInput,
            Error::Csv(_) => SuggestedAction::RunCheck,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => {
                "Run 'dm-core check' to validate the configuration file and its resolution path."
            }
            Error::ReferenceTooSmall { .. } => {
                "Provide more historical rows, lower service.min_reference_size, or lower service.window_size."
            }
            Error::ReferenceLoad(_) => {
                "Check service.reference_path and data_format (separator, header, date_column)."
            }

            Error::SchemaMismatch { .. } => {
                "Send rows with exactly the columns present in the reference dataset."
            }
            Error::InvalidBatch(_) => {
                "Send a JSON array of row objects, a column-to-array object, or a single row object."
            }

            Error::NotReady => "The service is still loading its reference dataset. Retry shortly.",

            Error::Evaluation(_) => {
                "The statistical engine rejected this window. Metrics resume on the next successful cycle."
            }
            Error::EvaluationTimeout { .. } => {
                "Raise service.evaluation_timeout_sec or reduce service.window_size."
            }
            Error::LabelShapeMismatch { .. } => {
                "The statistical engine emitted inconsistent labels for one metric. Report as a bug."
            }
            Error::Metrics(_) => "A metric name collides with an existing registration. Report as a bug.",

            Error::Io(_) => "Check file permissions and that the bind address is free. Retry the operation.",
            Error::Json(_) => "Invalid JSON. Check the request body or file syntax.",
            Error::Csv(_) => "Invalid CSV. Check the delimiter, header setting and row lengths.",
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::ReferenceTooSmall { .. } => "Reference Dataset Too Small",
            Error::ReferenceLoad(_) => "Reference Load Failed",

            Error::SchemaMismatch { .. } => "Schema Mismatch",
            Error::InvalidBatch(_) => "Invalid Batch",

            Error::NotReady => "Service Not Ready",

            Error::Evaluation(_) => "Evaluation Failed",
            Error::EvaluationTimeout { .. } => "Evaluation Timeout",
            Error::LabelShapeMismatch { .. } => "Metric Label Mismatch",
            Error::Metrics(_) => "Metric Registration Failed",

            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
            Error::Csv(_) => "CSV Parse Error",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Suggested action for automation.
    pub suggested_action: SuggestedAction,

    /// Additional structured context (e.g., row index, metric name).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::ReferenceTooSmall { rows, required } => {
                context.insert("rows".to_string(), serde_json::json!(rows));
                context.insert("required".to_string(), serde_json::json!(required));
            }
            Error::SchemaMismatch {
                row,
                missing,
                unexpected,
            } => {
                context.insert("row".to_string(), serde_json::json!(row));
                context.insert("missing".to_string(), serde_json::json!(missing));
                context.insert("unexpected".to_string(), serde_json::json!(unexpected));
            }
            Error::EvaluationTimeout { seconds } => {
                context.insert("timeout_seconds".to_string(), serde_json::json!(seconds));
            }
            Error::LabelShapeMismatch { metric, .. } => {
                context.insert("metric".to_string(), serde_json::json!(metric));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            suggested_action: err.suggested_action(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Format for operator output.
    pub fn format_human(&self, err: &Error) -> String {
        format!(
            "✗ {}\n  Reason: {}\n  Fix: {}",
            err.headline(),
            self.message,
            err.remediation()
        )
    }
}
