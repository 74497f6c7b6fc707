//! Domain Ports (Port/Adapter Pattern)
//!
//! The seams between the telemetry core and the outside world. Export
//! backends and profile capture are reached only through these traits, so
//! the pipeline and tracer can be driven by test doubles.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Core                                  │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                 Ports (Traits)                       │    │
//! │  │        Exporter │ Profiler │ CpuCapture              │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Adapters (Impls)                        │
//! │  PrometheusCollector │ OtlpExporter │ PprofProfiler  ...     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::metrics::MetricValue;

// =============================================================================
// Export Port
// =============================================================================

/// Port for an export backend.
///
/// Every backend receives the same registry snapshot. A backend reports its
/// own failure through the returned error and must not assume it is the only
/// consumer of the snapshot.
///
/// # Example
///
/// ```ignore
/// struct StdoutExporter;
///
/// #[async_trait]
/// impl Exporter for StdoutExporter {
///     async fn export(&self, snapshot: &[MetricValue]) -> Result<()> {
///         for metric in snapshot {
///             println!("{} {}", metric.name, metric.value);
///         }
///         Ok(())
///     }
///
///     fn name(&self) -> &str {
///         "stdout"
///     }
/// }
/// ```
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Hand one snapshot to the backend.
    async fn export(&self, snapshot: &[MetricValue]) -> Result<()>;

    /// Identifies the backend in logs and aggregated errors.
    fn name(&self) -> &str;
}

// =============================================================================
// Profile Capture Port
// =============================================================================

/// Point-in-time memory reading used for heap profile artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    /// Bytes currently in use
    pub in_use_bytes: u64,
    /// Live allocations, when an allocation count is known
    pub in_use_objects: u64,
    /// Bytes allocated since process start, when known
    pub allocated_bytes: u64,
    /// Allocations since process start, when known
    pub allocated_objects: u64,
}

/// A running CPU profile capture.
pub trait CpuCapture: Send {
    /// Stop sampling and write the profile to the path it was started with.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Port for deep profile capture.
///
/// Artifacts are opaque to the core: the only contract is "write a valid
/// profile to this path" so that the external renderer can read it later.
pub trait Profiler: Send + Sync {
    /// Begin a CPU profile that will be written to `path` on finish.
    fn start_cpu(&self, path: &Path) -> Result<Box<dyn CpuCapture>>;

    /// Write a heap profile snapshot to `path`.
    fn write_heap(&self, path: &Path, stats: &HeapStats) -> Result<()>;
}
