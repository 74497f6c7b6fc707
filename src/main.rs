//! PulseTrace Agent
//!
//! Runs the telemetry core next to a small HTTP surface: Prometheus scrape
//! endpoint, JSON metric and function views, and rendered profile details.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        PulseTrace Agent                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  HTTP API    │───▶│   Monitor    │───▶│   Exporters  │       │
//! │  │  (traced)    │    │ tracer+reg.  │    │ prom / otlp  │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pulsetrace::config::parse_duration;
use pulsetrace::metrics::Labels;
use pulsetrace::{Error, Monitor, OtlpConfig, TelemetryConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// PulseTrace - adaptive function tracing and metric export
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file; flags below override it
    #[arg(long, env = "PULSETRACE_CONFIG")]
    config: Option<PathBuf>,

    /// Invocations per deep-profile sample
    #[arg(long, env = "PULSETRACE_SAMPLING_RATE")]
    sampling_rate: Option<u64>,

    /// Export interval (e.g. "15s", "1m")
    #[arg(long, env = "PULSETRACE_EXPORT_INTERVAL")]
    export_interval: Option<String>,

    /// Base directory for profile artifacts
    #[arg(long, env = "PULSETRACE_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Maximum tracked function identities
    #[arg(long, env = "PULSETRACE_MAX_FUNCTIONS")]
    max_functions: Option<usize>,

    /// Maximum distinct metric names
    #[arg(long, env = "PULSETRACE_MAX_METRICS")]
    max_metrics: Option<usize>,

    /// OTLP/gRPC collector endpoint (host:port); enables push export
    #[arg(long, env = "OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    /// OTLP request header as key=value (repeatable)
    #[arg(long = "otlp-header", value_parser = parse_header)]
    otlp_headers: Vec<(String, String)>,

    /// Use plaintext transport for OTLP
    #[arg(long, env = "OTLP_INSECURE")]
    otlp_insecure: bool,

    /// HTTP server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

fn parse_header(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))
}

fn build_config(args: &Args) -> anyhow::Result<TelemetryConfig> {
    let mut config = match &args.config {
        Some(path) => TelemetryConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TelemetryConfig::default(),
    };

    if let Some(rate) = args.sampling_rate {
        config.sampling_rate = rate;
    }
    if let Some(interval) = &args.export_interval {
        config.export_interval = parse_duration(interval)?;
    }
    if let Some(dir) = &args.base_dir {
        config.base_dir = dir.clone();
    }
    if let Some(max) = args.max_functions {
        config.max_tracked_functions = max;
    }
    if let Some(max) = args.max_metrics {
        config.max_tracked_metrics = max;
    }
    if let Some(endpoint) = &args.otlp_endpoint {
        let mut otlp = OtlpConfig::new(endpoint.clone());
        otlp.insecure = args.otlp_insecure;
        otlp.headers = args.otlp_headers.iter().cloned().collect();
        config.otlp = Some(otlp);
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = build_config(&args)?;

    info!("Starting PulseTrace agent");
    info!("  Sampling rate: {}", config.sampling_rate);
    info!("  Export interval: {:?}", config.export_interval);
    info!("  Profile directory: {}", config.profile_dir().display());
    if let Some(otlp) = &config.otlp {
        info!("  OTLP endpoint: {}", otlp.endpoint_url());
    }

    let monitor = Monitor::new(config)?;
    let token = CancellationToken::new();
    monitor.start(&token);

    // Self metrics ride the same export interval
    let runtime_monitor = monitor.clone();
    let runtime_token = token.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(runtime_monitor.config().export_interval);
        loop {
            tokio::select! {
                _ = runtime_token.cancelled() => break,
                _ = tick.tick() => runtime_monitor.record_runtime_metrics(),
            }
        }
    });

    // Start HTTP server
    let server_monitor = monitor.clone();
    let server_token = token.clone();
    let metrics_addr = args.metrics_addr.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = run_http_server(&metrics_addr, server_monitor, server_token).await {
            error!("HTTP server error: {:#}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    token.cancel();
    monitor.shutdown().await?;
    let _ = server.await;

    info!("Agent shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        level @ ("trace" | "debug" | "info" | "warn" | "error") => level.to_string(),
        _ => "info".to_string(),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},hyper=warn,h2=warn,tonic=warn,tower=warn",
            level
        ))
    });

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// HTTP Server
// =============================================================================

type HttpResponse = Response<Full<Bytes>>;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
const JSON_CONTENT_TYPE: &str = "application/json";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

async fn run_http_server(
    addr: &str,
    monitor: Monitor,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid HTTP server address: {}", addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP server on {}", addr))?;

    info!("HTTP server listening on {}", addr);

    loop {
        let (stream, peer) = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted.context("HTTP server accept error")?,
        };

        let io = TokioIo::new(stream);
        let monitor = monitor.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle(monitor.clone(), req));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(%peer, "HTTP connection error: {}", e);
            }
        });
    }

    info!("HTTP server stopped");
    Ok(())
}

async fn handle(monitor: Monitor, req: Request<Incoming>) -> Result<HttpResponse, Infallible> {
    let path = req.uri().path().to_string();
    let query = parse_query(req.uri().query().unwrap_or_default());

    if req.method() != Method::GET {
        return Ok(respond(
            StatusCode::METHOD_NOT_ALLOWED,
            TEXT_CONTENT_TYPE,
            "method not allowed",
        ));
    }

    monitor
        .registry()
        .increment_counter(&request_metric_name(&path), 1.0, Labels::new());

    let tracer = Arc::clone(monitor.tracer());
    let identity = format!("http::{}", path);
    let response = tracer.trace_async(&identity, route(&monitor, &path, query)).await;
    Ok(response)
}

async fn route(monitor: &Monitor, path: &str, query: HashMap<String, String>) -> HttpResponse {
    match path {
        "/metrics" => match monitor.collector().render_text() {
            Ok(text) => respond(StatusCode::OK, PROMETHEUS_CONTENT_TYPE, text),
            Err(e) => error_response(&e),
        },
        "/api/v1/metrics" => json(&monitor.collector().scrape()),
        "/api/v1/functions" => json(&monitor.tracer().summary()),
        "/api/v1/function" => {
            let Some(name) = query.get("name").cloned() else {
                return respond(
                    StatusCode::BAD_REQUEST,
                    TEXT_CONTENT_TYPE,
                    "missing query parameter: name",
                );
            };
            let format = query
                .get("reportType")
                .cloned()
                .unwrap_or_else(|| "text".to_string());

            // The renderer is an external process
            let tracer = Arc::clone(monitor.tracer());
            let details =
                tokio::task::spawn_blocking(move || tracer.function_details(&name, &format)).await;
            match details {
                Ok(Ok(details)) => json(&details),
                Ok(Err(e)) => error_response(&e),
                Err(e) => error_response(&Error::Internal(format!("render task failed: {}", e))),
            }
        }
        "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, TEXT_CONTENT_TYPE, "ok"),
        _ => respond(StatusCode::NOT_FOUND, TEXT_CONTENT_TYPE, "not found"),
    }
}

/// Counter name for requests to one route; unknown paths share a name
fn request_metric_name(path: &str) -> String {
    let route = match path {
        "/metrics" => "metrics",
        "/api/v1/metrics" => "api_metrics",
        "/api/v1/functions" => "api_functions",
        "/api/v1/function" => "api_function",
        "/healthz" | "/livez" | "/readyz" => "health",
        _ => "unmatched",
    };
    format!("pulsetrace_http_{}_requests_total", route)
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = urlencoding::decode(&key.replace('+', " ")).ok()?.into_owned();
            let value = urlencoding::decode(&value.replace('+', " ")).ok()?.into_owned();
            Some((key, value))
        })
        .collect()
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json<T: Serialize>(value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => respond(StatusCode::OK, JSON_CONTENT_TYPE, body),
        Err(e) => error_response(&Error::Internal(format!("serialization failed: {}", e))),
    }
}

fn error_response(e: &Error) -> HttpResponse {
    let status = if e.is_not_found() {
        StatusCode::NOT_FOUND
    } else if e.is_bad_request() {
        StatusCode::BAD_REQUEST
    } else if e.is_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    respond(status, TEXT_CONTENT_TYPE, e.to_string())
}
