//! HTTP front end: ingestion, metrics exposition and health checks.
//!
//! Runs a `tiny_http` server on a background thread. The listener comes up
//! before the reference is loaded; until the service is installed in the
//! [`ReadySlot`], ingestion answers 503 and `/ready` reports starting.
//!
//! Routes:
//! - `POST <iterate_path>`: ingest a JSON batch
//! - `GET <metrics_path>`: Prometheus text exposition
//! - `GET /health`: liveness
//! - `GET /ready`: readiness

use dm_common::{BatchPayload, Error, StructuredError};
use dm_config::ServerConfig;
use prometheus::Registry;
use std::io::Read;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::logging::event_names;
use crate::metrics::render_registry;
use crate::monitor::MonitoringService;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

/// One-shot holder for the service, filled once startup completes.
#[derive(Clone, Default)]
pub struct ReadySlot(Arc<OnceLock<Arc<MonitoringService>>>);

impl ReadySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the service. Returns false if one was already installed.
    pub fn install(&self, service: Arc<MonitoringService>) -> bool {
        self.0.set(service).is_ok()
    }

    pub fn get(&self) -> Result<&Arc<MonitoringService>, Error> {
        self.0.get().ok_or(Error::NotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.0.get().is_some()
    }
}

/// A response before it is handed to `tiny_http`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpResponse {
    fn text(status: u16, body: impl Into<String>) -> Self {
        HttpResponse {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }

    fn json(status: u16, body: String) -> Self {
        HttpResponse {
            status,
            content_type: "application/json",
            body,
        }
    }

    fn error(err: &Error, pretty: bool) -> Self {
        let structured = StructuredError::from(err);
        let body = to_json(&serde_json::json!({ "error": structured }), pretty);
        Self::json(status_for(err), body)
    }
}

/// HTTP status for an ingestion error.
pub fn status_for(err: &Error) -> u16 {
    match err {
        Error::NotReady => 503,
        Error::SchemaMismatch { .. } | Error::InvalidBatch(_) | Error::Json(_) => 400,
        _ => 500,
    }
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> String {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    rendered.unwrap_or_else(|e| format!(r#"{{"error":"serialization failed: {}"}}"#, e))
}

/// Everything a request handler needs.
#[derive(Clone)]
pub struct Router {
    iterate_path: String,
    metrics_path: String,
    pretty: bool,
    registry: Registry,
    slot: ReadySlot,
}

impl Router {
    pub fn new(config: &ServerConfig, registry: Registry, slot: ReadySlot, pretty: bool) -> Self {
        Router {
            iterate_path: config.iterate_path.clone(),
            metrics_path: config.metrics_path.clone(),
            pretty,
            registry,
            slot,
        }
    }

    /// Dispatch one request.
    pub fn handle(&self, method: &str, url: &str, body: &[u8]) -> HttpResponse {
        let path = url.split('?').next().unwrap_or(url);
        let path = if path.len() > 1 {
            path.trim_end_matches('/')
        } else {
            path
        };

        match (method, path) {
            ("POST", p) if p == self.iterate_path => self.iterate(body),
            ("GET", p) if p == self.metrics_path => self.scrape(),
            ("GET", "/health") | ("GET", "/healthz") => HttpResponse::text(200, "ok"),
            ("GET", "/ready") => {
                if self.slot.is_ready() {
                    HttpResponse::text(200, "ready")
                } else {
                    HttpResponse::text(503, "starting")
                }
            }
            (_, p) if p == self.iterate_path || p == self.metrics_path => {
                HttpResponse::text(405, "method not allowed")
            }
            _ => HttpResponse::text(404, "not found"),
        }
    }

    fn iterate(&self, body: &[u8]) -> HttpResponse {
        let result = self.slot.get().and_then(|service| {
            let rows = BatchPayload::from_json(body)?.into_records()?;
            service.ingest(rows)
        });
        match result {
            Ok(outcome) => HttpResponse::json(200, to_json(&outcome, self.pretty)),
            Err(e) => HttpResponse::error(&e, self.pretty),
        }
    }

    fn scrape(&self) -> HttpResponse {
        match render_registry(&self.registry) {
            Ok(body) => HttpResponse {
                status: 200,
                content_type: "text/plain; version=0.0.4; charset=utf-8",
                body,
            },
            Err(e) => {
                error!(error = %e, "failed to render metrics");
                HttpResponse::text(500, format!("error: {}", e))
            }
        }
    }
}

/// Handle to the running HTTP server.
pub struct HttpServer {
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    addr: SocketAddr,
}

impl HttpServer {
    /// Bind and start serving on a background thread.
    pub fn start(bind: &str, port: u16, router: Router) -> Result<Self, Error> {
        let addr: SocketAddr = format!("{}:{}", bind, port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address {}:{}: {}", bind, port, e)))?;

        let server = tiny_http::Server::http(addr)
            .map_err(|e| Error::Config(format!("failed to listen on {}: {}", addr, e)))?;
        // Port 0 binds an ephemeral port; report the real one.
        let addr = server.server_addr().to_ip().unwrap_or(addr);

        info!(
            target: event_names::SERVER_LISTENING,
            addr = %addr,
            iterate = %router.iterate_path,
            metrics = %router.metrics_path,
            "http server started"
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let thread = thread::Builder::new()
            .name("dm-http".to_string())
            .spawn(move || serve_loop(server, &router, &shutdown_clone))
            .map_err(Error::Io)?;

        Ok(Self {
            shutdown,
            thread: Some(thread),
            addr,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Block until the server thread exits.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Stop accepting requests and wait for the thread.
    pub fn shutdown(mut self) {
        self.stop();
        info!("http server stopped");
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Unblock the accept loop.
        let _ = std::net::TcpStream::connect(self.addr);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve_loop(server: tiny_http::Server, router: &Router, shutdown: &AtomicBool) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let mut request = match server.recv_timeout(Duration::from_secs(1)) {
            Ok(Some(req)) => req,
            Ok(None) => continue,
            Err(e) => {
                if !shutdown.load(Ordering::SeqCst) {
                    error!(error = %e, "http accept error");
                }
                break;
            }
        };

        if shutdown.load(Ordering::SeqCst) {
            let _ = request
                .respond(tiny_http::Response::from_string("shutting down").with_status_code(503));
            break;
        }

        let method = request.method().as_str().to_ascii_uppercase();
        let url = request.url().to_string();
        debug!(method = %method, url = %url, "http request");

        let mut body = Vec::new();
        if let Err(e) = request
            .as_reader()
            .take(MAX_BODY_BYTES + 1)
            .read_to_end(&mut body)
        {
            report_request_failure(&url, "failed to read request body", &e);
            let _ = request
                .respond(tiny_http::Response::from_string("bad request").with_status_code(400));
            continue;
        }
        let response = if body.len() as u64 > MAX_BODY_BYTES {
            HttpResponse::text(413, "payload too large")
        } else {
            router.handle(&method, &url, &body)
        };

        let mut reply =
            tiny_http::Response::from_string(response.body).with_status_code(response.status);
        if let Ok(header) = tiny_http::Header::from_bytes(
            &b"Content-Type"[..],
            response.content_type.as_bytes(),
        ) {
            reply = reply.with_header(header);
        }
        if let Err(e) = request.respond(reply) {
            report_request_failure(&url, "failed to send response", &e);
        }
    }
}

fn report_request_failure(url: &str, what: &str, error: &std::io::Error) {
    warn!(
        target: event_names::SERVER_REQUEST_FAILED,
        error = %error,
        url = url,
        "{}",
        what
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogContext;
    use crate::monitor::{DescriptiveEngine, MonitorSettings};
    use dm_common::Record;

    fn router_with(slot: &ReadySlot, registry: &Registry) -> Router {
        Router::new(&ServerConfig::default(), registry.clone(), slot.clone(), false)
    }

    fn ready_router(window: usize) -> Router {
        let registry = Registry::new();
        let slot = ReadySlot::new();
        let history: Vec<Record> = (0..4).map(|i| Record::new().with("x", i as f64)).collect();
        let service = MonitoringService::new(
            MonitorSettings::with_window(window),
            history,
            Arc::new(DescriptiveEngine::default()),
            registry.clone(),
            LogContext::new("run-t", "host-t"),
        )
        .unwrap();
        assert!(slot.install(Arc::new(service)));
        router_with(&slot, &registry)
    }

    #[test]
    fn not_ready_before_install() {
        let slot = ReadySlot::new();
        let router = router_with(&slot, &Registry::new());
        let res = router.handle("POST", "/iterate", br#"{"x": 1}"#);
        assert_eq!(res.status, 503);
        assert!(res.body.contains("\"code\":30"));
        assert_eq!(router.handle("GET", "/ready", b"").status, 503);
        assert_eq!(router.handle("GET", "/health", b"").status, 200);
    }

    #[test]
    fn iterate_accepts_all_payload_shapes() {
        let router = ready_router(10);
        for body in [
            &br#"{"x": 1}"#[..],
            &br#"[{"x": 1}, {"x": 2}]"#[..],
            &br#"{"x": [1, 2, 3]}"#[..],
        ] {
            let res = router.handle("POST", "/iterate", body);
            assert_eq!(res.status, 200, "{}", res.body);
            assert_eq!(res.content_type, "application/json");
        }
    }

    #[test]
    fn iterate_rejects_bad_input() {
        let router = ready_router(10);
        assert_eq!(router.handle("POST", "/iterate", b"not json").status, 400);
        assert_eq!(router.handle("POST", "/iterate", b"[{}]").status, 400);
        assert_eq!(router.handle("POST", "/iterate", br#"{"y": 1}"#).status, 400);
        assert_eq!(
            router
                .handle("POST", "/iterate", br#"{"x": [1, 2], "y": [1]}"#)
                .status,
            400
        );
    }

    #[test]
    fn metrics_and_routing() {
        let router = ready_router(2);
        let res = router.handle("GET", "/metrics", b"");
        assert_eq!(res.status, 200);
        assert!(res.body.contains("drift_monitor_reference_dataset_hash"));
        assert_eq!(router.handle("GET", "/metrics/", b"").status, 200);
        assert_eq!(router.handle("GET", "/metrics?x=1", b"").status, 200);
        assert_eq!(router.handle("GET", "/iterate", b"").status, 405);
        assert_eq!(router.handle("GET", "/nope", b"").status, 404);
        assert_eq!(router.handle("GET", "/ready", b"").status, 200);
    }

    mod events {
        use super::*;
        use crate::logging::JsonlLayer;
        use std::io::{self, Write};
        use std::sync::Mutex;
        use tracing_subscriber::layer::SubscriberExt;

        struct Buffer(Arc<Mutex<Vec<u8>>>);

        impl Write for Buffer {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        fn capture(f: impl FnOnce()) -> Vec<serde_json::Value> {
            let buffer = Arc::new(Mutex::new(Vec::new()));
            let subscriber =
                tracing_subscriber::registry().with(JsonlLayer::new(Buffer(buffer.clone())));
            tracing::subscriber::with_default(subscriber, f);
            let output = buffer.lock().unwrap();
            String::from_utf8_lossy(&output)
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }

        #[test]
        fn request_failure_uses_named_event() {
            let lines = capture(|| {
                let error = io::Error::new(io::ErrorKind::BrokenPipe, "peer went away");
                report_request_failure("/iterate", "failed to send response", &error);
            });
            assert_eq!(lines.len(), 1);
            assert_eq!(lines[0]["event"], event_names::SERVER_REQUEST_FAILED);
            assert_eq!(lines[0]["level"], "warn");
            assert_eq!(lines[0]["message"], "failed to send response");
            assert_eq!(lines[0]["fields"]["url"], "/iterate");
        }

        #[test]
        fn start_uses_named_event() {
            let slot = ReadySlot::new();
            let lines = capture(|| {
                let server =
                    HttpServer::start("127.0.0.1", 0, router_with(&slot, &Registry::new()))
                        .unwrap();
                server.shutdown();
            });
            assert!(lines
                .iter()
                .any(|line| line["event"] == event_names::SERVER_LISTENING));
        }
    }

    #[test]
    fn status_mapping() {
        assert_eq!(status_for(&Error::NotReady), 503);
        assert_eq!(status_for(&Error::InvalidBatch("x".into())), 400);
        assert_eq!(status_for(&Error::Evaluation("x".into())), 500);
    }
}
