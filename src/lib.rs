//! PulseTrace - In-process Telemetry Core
//!
//! Adaptive function tracing, a bounded metric registry and a periodic
//! export pipeline fanning snapshots out to pull and push backends.
//!
//! # Architecture
//!
//! ```text
//! application code
//!       │
//!       ├──► Tracer ──► function table ──► summary / rendered profiles
//!       │      └── every Nth call: CPU profile + heap snapshot
//!       │
//!       └──► MetricRegistry ──► ExportPipeline (interval) ──► FanoutExporter
//!                                                               ├─► PrometheusCollector (pull)
//!                                                               └─► OtlpExporter (push)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use pulsetrace::{Monitor, TelemetryConfig};
//! use pulsetrace::metrics::Labels;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> pulsetrace::Result<()> {
//! let monitor = Monitor::new(TelemetryConfig::default())?;
//! let token = CancellationToken::new();
//! monitor.start(&token);
//!
//! let total = monitor.tracer().trace("checkout", || 2 + 2);
//! assert_eq!(total, 4);
//! monitor.registry().increment_counter("orders_total", 1.0, Labels::new());
//!
//! monitor.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Exporter backends (Prometheus pull, OTLP push, recording)
//! - [`config`] - Configuration and duration parsing
//! - [`domain`] - Port traits between the core and its backends
//! - [`error`] - Error types
//! - [`export`] - Export pipeline and fan-out
//! - [`metrics`] - Metric registry
//! - [`monitor`] - Composition root
//! - [`tracer`] - Adaptive function tracer, capability capture, profiles

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod export;
pub mod metrics;
pub mod monitor;
pub mod tracer;

// Re-export commonly used types
pub use config::{OtlpConfig, RendererConfig, TelemetryConfig};
pub use domain::Exporter;
pub use error::{Error, ExportErrors, Result};
pub use export::{ExportPipeline, FanoutExporter};
pub use metrics::{MetricKind, MetricRegistry, MetricValue};
pub use monitor::Monitor;
pub use tracer::{callable, Callable, FunctionMetricRecord, Tracer, TracerConfig, Value};
