//! Drift Monitor Core
//!
//! Entry point for the `dm-core` binary:
//! - `serve`: HTTP ingestion and Prometheus exposition
//! - `check`: validate config and reference without serving
//! - `replay`: feed a CSV through a fresh monitor offline

use clap::{Args, Parser, Subcommand};
use dm_common::{Error, StructuredError};
use dm_config::{load_config, ConfigError, ConfigOptions, ResolvedConfig};
use dm_core::exit_codes::ExitCode;
use dm_core::loader::load_csv;
use dm_core::logging::{
    event_names, init_logging, LogConfig, LogContext, LogFormat, LogLevel, Stage,
};
use dm_core::monitor::EvaluationStatus;
use dm_core::server::{HttpServer, ReadySlot, Router};
use dm_core::startup::build_service;
use prometheus::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Drift Monitor Core - sliding-window drift detection exported as Prometheus gauges
#[derive(Parser)]
#[command(name = "dm-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to the config file (YAML, TOML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q, -qq)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Log output format: human or jsonl
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP ingestion and metrics service (default)
    Serve(ServeArgs),

    /// Validate configuration and reference dataset
    Check,

    /// Feed a production CSV through a fresh monitor and print the metrics
    Replay(ReplayArgs),

    /// Print version information
    Version,
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override server.bind
    #[arg(long)]
    bind: Option<String>,

    /// Override server.port
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// CSV file of production rows, same format as the reference
    csv: PathBuf,

    /// Rows per ingestion batch
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    batch_size: u32,

    /// Simulated seconds between batches [default: service.calculation_period_sec]
    ///
    /// Replay runs on a synthetic clock, not the wall clock, so the
    /// evaluation throttle sees batches this far apart.
    #[arg(long)]
    batch_interval_sec: Option<u64>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::Clean
                }
                _ => ExitCode::ArgsError,
            };
            let _ = e.print();
            std::process::exit(code.as_i32());
        }
    };

    let cli_level = if cli.global.verbose > 0 || cli.global.quiet > 0 {
        Some(LogLevel::Info.adjust(cli.global.verbose, cli.global.quiet))
    } else {
        None
    };
    init_logging(&LogConfig::from_env(cli_level, cli.global.log_format));

    let log = LogContext::for_this_run();
    let exit_code = match cli.command {
        None => run_serve(&cli.global, &ServeArgs::default(), &log),
        Some(Commands::Serve(args)) => run_serve(&cli.global, &args, &log),
        Some(Commands::Check) => run_check(&cli.global, &log),
        Some(Commands::Replay(args)) => run_replay(&cli.global, &args, &log),
        Some(Commands::Version) => {
            print_version();
            ExitCode::Clean
        }
    };

    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Commands
// ============================================================================

fn run_serve(global: &GlobalOpts, args: &ServeArgs, log: &LogContext) -> ExitCode {
    let resolved = match load(global, log) {
        Ok(resolved) => resolved,
        Err(code) => return code,
    };

    let mut server_config = resolved.config.server.clone();
    if let Some(bind) = &args.bind {
        server_config.bind = bind.clone();
    }
    if let Some(port) = args.port {
        server_config.port = port;
    }

    // Listen first; requests before the reference is ready get 503.
    let registry = Registry::new();
    let slot = ReadySlot::new();
    let router = Router::new(
        &server_config,
        registry.clone(),
        slot.clone(),
        resolved.config.pretty_print,
    );
    let server = match HttpServer::start(&server_config.bind, server_config.port, router) {
        Ok(server) => server,
        Err(e) => return report_error(&e, log),
    };
    let addr = server.addr().to_string();
    dm_core::log_event!(
        log,
        INFO,
        event_names::SERVER_LISTENING,
        Stage::Serve,
        "listening",
        addr = addr.as_str()
    );

    let service = match build_service(&resolved, registry, log.clone()) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            let code = report_error(&e, log);
            server.shutdown();
            return code;
        }
    };
    slot.install(service);

    dm_core::log_event!(
        log,
        INFO,
        event_names::SERVICE_STARTED,
        Stage::Serve,
        "monitor ready",
        addr = addr.as_str(),
        config_hash = resolved.snapshot.config_hash.as_str()
    );

    server.join();

    dm_core::log_event!(
        log,
        INFO,
        event_names::SERVICE_STOPPED,
        Stage::Serve,
        "server exited"
    );
    ExitCode::Clean
}

fn run_check(global: &GlobalOpts, log: &LogContext) -> ExitCode {
    let resolved = match load(global, log) {
        Ok(resolved) => resolved,
        Err(code) => return code,
    };
    let service = match build_service(&resolved, Registry::new(), log.clone()) {
        Ok(service) => service,
        Err(e) => return report_error(&e, log),
    };

    let status = service.status();
    let report = serde_json::json!({
        "config": resolved.snapshot,
        "reference": {
            "path": resolved.reference_path().display().to_string(),
            "rows": status.reference_rows,
            "fingerprint": status.reference_fingerprint,
        },
        "window": {
            "window_size": status.window_size,
            "seeded_rows": status.window_rows,
        },
        "schema": status.schema,
    });
    print_json(&report, resolved.config.pretty_print);
    ExitCode::Clean
}

fn run_replay(global: &GlobalOpts, args: &ReplayArgs, log: &LogContext) -> ExitCode {
    let resolved = match load(global, log) {
        Ok(resolved) => resolved,
        Err(code) => return code,
    };
    let service = match build_service(&resolved, Registry::new(), log.clone()) {
        Ok(service) => service,
        Err(e) => return report_error(&e, log),
    };

    let config = &resolved.config;
    let rows = match load_csv(&args.csv, &config.data_format, config.date_column()) {
        Ok(rows) => rows,
        Err(e) => return report_error(&Error::InvalidBatch(e.to_string()), log),
    };

    let batch_size = args.batch_size as usize;
    let interval = args
        .batch_interval_sec
        .map(Duration::from_secs)
        .or(service.settings().calculation_period)
        .unwrap_or_default();
    let start = Instant::now();
    let mut evaluations = 0usize;
    let mut failures = 0usize;
    for (index, batch) in rows.chunks(batch_size).enumerate() {
        match service.ingest_at(batch.to_vec(), replay_clock(start, interval, index)) {
            Ok(outcome) => match outcome.evaluation {
                EvaluationStatus::Evaluated { .. } => evaluations += 1,
                EvaluationStatus::Failed { .. } => failures += 1,
                _ => {}
            },
            Err(e) => {
                tracing::error!(batch = index, "replay stopped at rejected batch");
                return report_error(&e, log);
            }
        }
    }

    dm_core::log_event!(
        log,
        INFO,
        event_names::EVALUATE_FINISHED,
        Stage::Evaluate,
        "replay finished",
        rows = rows.len(),
        evaluations = evaluations,
        failures = failures
    );

    match service.render_metrics() {
        Ok(text) => {
            print!("{}", text);
            ExitCode::Clean
        }
        Err(e) => report_error(&e, log),
    }
}

/// Simulated time of the `index`-th replayed batch.
fn replay_clock(start: Instant, interval: Duration, index: usize) -> Instant {
    let steps = u32::try_from(index).unwrap_or(u32::MAX);
    start
        .checked_add(interval.saturating_mul(steps))
        .unwrap_or(start)
}

fn print_version() {
    println!("dm-core {}", env!("CARGO_PKG_VERSION"));
}

// ============================================================================
// Helpers
// ============================================================================

fn load(global: &GlobalOpts, log: &LogContext) -> Result<ResolvedConfig, ExitCode> {
    let options = ConfigOptions {
        config_path: global.config.clone(),
    };
    match load_config(&options) {
        Ok(resolved) => {
            let path = resolved.path.display().to_string();
            dm_core::log_event!(
                log,
                INFO,
                event_names::CONFIG_LOADED,
                Stage::Init,
                "configuration loaded",
                path = path.as_str(),
                source = resolved.snapshot.config_source.as_str(),
                config_hash = resolved.snapshot.config_hash.as_str()
            );
            Ok(resolved)
        }
        Err(e) => Err(report_config_error(&e, log)),
    }
}

fn report_config_error(err: &ConfigError, log: &LogContext) -> ExitCode {
    dm_core::log_event!(
        log,
        ERROR,
        event_names::CONFIG_ERROR,
        Stage::Init,
        err.to_string()
    );
    eprintln!("✗ Configuration Error\n  Reason: {}", err);
    ExitCode::from(err)
}

fn report_error(err: &Error, log: &LogContext) -> ExitCode {
    let structured = StructuredError::from(err);
    dm_core::log_event!(
        log,
        ERROR,
        event_names::INTERNAL_ERROR,
        Stage::Init,
        err.to_string(),
        code = err.code()
    );
    eprintln!("{}", structured.format_human(err));
    ExitCode::from(err)
}

fn print_json(value: &serde_json::Value, pretty: bool) {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match rendered {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to serialize report: {}", e),
    }
}
