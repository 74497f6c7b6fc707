//! Exporter Adapters
//!
//! Concrete backends for the `Exporter` port, following the Port/Adapter
//! (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                             │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                    Ports (Traits)                         │  │
//! │  │           Exporter  │  Profiler  │  CpuCapture            │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                      │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │ PrometheusCollector (pull) │ OtlpExporter (push)          │  │
//! │  │ InMemoryExporter │ LoggingExporter                        │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use pulsetrace::adapters::{LoggingExporter, PrometheusCollector};
//! use pulsetrace::export::FanoutExporter;
//!
//! let collector = Arc::new(PrometheusCollector::new());
//! let fanout = FanoutExporter::default()
//!     .with_exporter(collector.clone())
//!     .with_exporter(Arc::new(LoggingExporter::debug_level()));
//! ```

mod otlp;
mod prometheus;
mod recording;

pub use self::otlp::OtlpExporter;
pub use self::prometheus::{PrometheusCollector, ScrapeRecord};
pub use self::recording::{InMemoryExporter, LoggingExporter};
