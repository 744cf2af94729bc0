//! Structured event definitions for logging.
//!
//! Events follow a consistent schema for machine-parseable JSONL output.
//! All events carry the run and host ids plus the pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Log levels for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Stages of the monitoring pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup, configuration and reference loading.
    Init,
    /// Batch decoding, schema check and append.
    Ingest,
    /// Gate decision and engine call.
    Evaluate,
    /// Writing results to the metric sink.
    Publish,
    /// HTTP request handling.
    Serve,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Ingest => "ingest",
            Stage::Evaluate => "evaluate",
            Stage::Publish => "publish",
            Stage::Serve => "serve",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Lifecycle
    pub const SERVICE_STARTED: &str = "service.started";
    pub const SERVICE_STOPPED: &str = "service.stopped";

    // Config/init
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_ERROR: &str = "config.error";
    pub const REFERENCE_LOADED: &str = "reference.loaded";
    pub const REFERENCE_REPLACED: &str = "reference.replaced";
    pub const REFERENCE_REJECTED: &str = "reference.rejected";

    // Ingest
    pub const INGEST_ACCEPTED: &str = "ingest.accepted";
    pub const INGEST_REJECTED: &str = "ingest.rejected";

    // Gate and evaluation
    pub const GATE_INSUFFICIENT_DATA: &str = "gate.insufficient_data";
    pub const GATE_THROTTLED: &str = "gate.throttled";
    pub const EVALUATE_FINISHED: &str = "evaluate.finished";
    pub const EVALUATE_FAILED: &str = "evaluate.failed";

    // Publish
    pub const PUBLISH_REJECTED: &str = "publish.rejected";

    // Serve
    pub const SERVER_LISTENING: &str = "server.listening";
    pub const SERVER_REQUEST_FAILED: &str = "server.request_failed";

    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// A structured log event for JSONL output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts: DateTime<Utc>,
    pub level: Level,
    /// Event name (e.g., "service.started", "evaluate.finished").
    pub event: String,
    /// Unique ID for this invocation of dm-core.
    pub run_id: String,
    pub stage: Stage,
    pub host_id: String,
    pub message: String,
    /// Additional structured fields (stable keys).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, serde_json::Value>,
}

impl LogEvent {
    pub fn new(
        level: Level,
        event: impl Into<String>,
        run_id: impl Into<String>,
        host_id: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> Self {
        LogEvent {
            ts: Utc::now(),
            level,
            event: event.into(),
            run_id: run_id.into(),
            stage,
            host_id: host_id.into(),
            message: message.into(),
            fields: HashMap::new(),
        }
    }

    /// Add a field to the event.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.into(), v);
        }
        self
    }

    /// Serialize to a single JSON line.
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"serialization_failed","event":"{}"}}"#,
                self.event
            )
        })
    }
}

/// Context for generating log events with consistent ids.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub run_id: String,
    pub host_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
            host_id: host_id.into(),
        }
    }

    /// A context with a fresh run id for the local host.
    pub fn for_this_run() -> Self {
        LogContext::new(super::generate_run_id(), super::get_host_id())
    }

    pub fn event(
        &self,
        level: Level,
        event: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> LogEvent {
        LogEvent::new(level, event, &self.run_id, &self.host_id, stage, message)
    }

    pub fn info(&self, event: impl Into<String>, stage: Stage, message: impl Into<String>) -> LogEvent {
        self.event(Level::Info, event, stage, message)
    }

    pub fn warn(&self, event: impl Into<String>, stage: Stage, message: impl Into<String>) -> LogEvent {
        self.event(Level::Warn, event, stage, message)
    }
}
