//! Initialization phase: config to a ready [`MonitoringService`].

use dm_common::{Record, Result};
use dm_config::ResolvedConfig;
use prometheus::Registry;
use std::sync::Arc;

use crate::loader::load_csv;
use crate::logging::{event_names, LogContext, Stage};
use crate::monitor::{DescriptiveEngine, MonitorSettings, MonitoringService, StatisticalEngine};

/// Read the historical dataset named by the config.
pub fn load_history(resolved: &ResolvedConfig) -> Result<Vec<Record>> {
    let path = resolved.reference_path();
    let config = &resolved.config;
    load_csv(&path, &config.data_format, config.date_column())
}

/// Load the reference and build the service with the built-in engine,
/// running the monitor groups listed in the config.
pub fn build_service(
    resolved: &ResolvedConfig,
    registry: Registry,
    log: LogContext,
) -> Result<MonitoringService> {
    let engine = DescriptiveEngine::new(&resolved.config.service.monitors);
    build_service_with(resolved, registry, log, Arc::new(engine))
}

/// Same as [`build_service`] with a caller-supplied engine.
pub fn build_service_with(
    resolved: &ResolvedConfig,
    registry: Registry,
    log: LogContext,
    engine: Arc<dyn StatisticalEngine>,
) -> Result<MonitoringService> {
    let history = load_history(resolved)?;
    let path = resolved.reference_path().display().to_string();
    crate::log_event!(
        log,
        DEBUG,
        event_names::CONFIG_LOADED,
        Stage::Init,
        "reference file read",
        rows = history.len(),
        path = path.as_str()
    );
    let settings = MonitorSettings::from_config(&resolved.config);
    MonitoringService::new(settings, history, engine, registry, log)
}
