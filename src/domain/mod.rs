//! Domain Layer
//!
//! Trait seams (ports) the core depends on, plus the small value objects
//! that cross them.
//!
//! # Usage
//!
//! ```ignore
//! use pulsetrace::domain::ports::Exporter;
//!
//! // Use traits for dependency injection
//! async fn push_all<E: Exporter>(exporter: &E, registry: &MetricRegistry) -> Result<()> {
//!     exporter.export(&registry.get_all()).await
//! }
//! ```

pub mod ports;

pub use ports::{CpuCapture, Exporter, HeapStats, Profiler};
