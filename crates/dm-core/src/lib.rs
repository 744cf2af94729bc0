//! Drift monitor core library.
//!
//! Keeps a bounded sliding window of production records, gates statistical
//! evaluation against a reference dataset, and exposes the results as
//! Prometheus gauges over HTTP.
//!
//! The `dm-core` binary wires these pieces together; the modules here are
//! usable on their own for embedding and tests.

pub mod exit_codes;
pub mod loader;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod server;
pub mod startup;

pub use exit_codes::ExitCode;
pub use monitor::{IngestOutcome, MonitorSettings, MonitoringService};
