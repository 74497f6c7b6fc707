//! Adaptive Function Tracer
//!
//! Every traced call is timed and counted. Every `rate`-th call of an
//! identity is additionally deep-profiled: a CPU profile is captured across
//! the call and a heap snapshot is written after it.
//!
//! ```text
//!   trace(identity, f)
//!        │
//!        ├── count += 1 ──► sampled = count % rate == 0
//!        ├── units_before = concurrency_units()
//!        ├── [sampled] heap_before, start CPU capture
//!        ├── f()
//!        ├── [sampled] finish CPU capture, write heap profile
//!        └── upsert FunctionMetricRecord (bounded table)
//! ```
//!
//! Profiling failures never reach the caller; they are logged and the run's
//! record is still written.

mod callable;
mod probe;
mod profile;
mod render;
mod sampling;
mod table;

pub use callable::{
    callable, identity_of, signature_identity, Callable, FnAdapter, IntoCallable, IntoResults, Value,
};
pub use probe::{concurrency_units, heap_stats, tracking_enabled, TrackingAllocator};
pub use profile::{
    default_profiler, sanitize_file_name, write_heap_profile, NoopProfiler, ProfilePaths,
};
#[cfg(unix)]
pub use profile::PprofProfiler;
pub use render::{find_program, FunctionTraceDetails, ProfileKind, ProfileRenderer, ReportFormat};
pub use sampling::SamplingState;
pub use table::{BoundedMap, FunctionMetricRecord};

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::config::{RendererConfig, TelemetryConfig};
use crate::domain::{CpuCapture, HeapStats, Profiler};
use crate::error::{Error, Result};

/// Tracer configuration
#[derive(Debug, Clone)]
pub struct TracerConfig {
    /// Invocations per deep-profile sample (clamped to at least 1)
    pub sampling_rate: u64,
    /// Directory receiving profile artifacts
    pub profile_dir: PathBuf,
    /// Cap for both the function table and the sampling counters
    pub max_tracked_functions: usize,
    pub renderer: RendererConfig,
}

impl Default for TracerConfig {
    fn default() -> Self {
        TelemetryConfig::default().into()
    }
}

impl From<&TelemetryConfig> for TracerConfig {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            sampling_rate: config.sampling_rate,
            profile_dir: config.profile_dir(),
            max_tracked_functions: config.max_tracked_functions,
            renderer: config.renderer.clone(),
        }
    }
}

impl From<TelemetryConfig> for TracerConfig {
    fn from(config: TelemetryConfig) -> Self {
        Self::from(&config)
    }
}

/// In-flight state of one traced call
struct Invocation {
    sampled: bool,
    started_at: DateTime<Utc>,
    start: Instant,
    units_before: u64,
    heap_before: HeapStats,
    paths: Option<ProfilePaths>,
    cpu: Option<Box<dyn CpuCapture>>,
}

/// Function tracer: sampling, deep profiles and the function metric table
pub struct Tracer {
    sampling: SamplingState,
    functions: Mutex<BoundedMap<FunctionMetricRecord>>,
    profile_dir: PathBuf,
    profiler: Arc<dyn Profiler>,
    renderer: ProfileRenderer,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("sampling_rate", &self.sampling.rate())
            .field("profile_dir", &self.profile_dir)
            .field("tracked_functions", &self.functions.lock().len())
            .finish()
    }
}

impl Tracer {
    /// Create a tracer with the platform's default profiler
    pub fn new(config: TracerConfig) -> Self {
        Self::with_profiler(config, default_profiler())
    }

    /// Create a tracer with an injected profiler
    pub fn with_profiler(config: TracerConfig, profiler: Arc<dyn Profiler>) -> Self {
        Self {
            sampling: SamplingState::new(config.sampling_rate, config.max_tracked_functions),
            functions: Mutex::new(BoundedMap::new(config.max_tracked_functions)),
            profile_dir: config.profile_dir,
            profiler,
            renderer: ProfileRenderer::new(config.renderer),
        }
    }

    pub fn profile_dir(&self) -> &PathBuf {
        &self.profile_dir
    }

    // =========================================================================
    // Tracing
    // =========================================================================

    /// Trace a call under an explicit identity
    pub fn trace<R>(&self, identity: &str, f: impl FnOnce() -> R) -> R {
        let invocation = self.begin(identity);
        let result = f();
        self.finish(identity, invocation);
        result
    }

    /// Trace a call; the identity is the function's type path
    pub fn trace_fn<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.trace(identity_of::<F>(), f)
    }

    /// Trace a future from its first poll to completion
    pub async fn trace_async<F>(&self, identity: &str, future: F) -> F::Output
    where
        F: Future,
    {
        let invocation = self.begin(identity);
        let output = future.await;
        self.finish(identity, invocation);
        output
    }

    /// Trace a captured callable, discarding its results.
    ///
    /// Argument-shape errors are returned before anything runs and leave no
    /// trace behind.
    pub fn trace_with_args<C>(&self, callable: &C, args: Vec<Value>) -> Result<()>
    where
        C: Callable + ?Sized,
    {
        self.trace_with_returns(callable, args).map(|_| ())
    }

    /// Trace a captured callable and return its first result, if any
    pub fn trace_with_return<C>(&self, callable: &C, args: Vec<Value>) -> Result<Option<Value>>
    where
        C: Callable + ?Sized,
    {
        Ok(self.trace_with_returns(callable, args)?.into_iter().next())
    }

    /// Trace a captured callable and return every result in order
    pub fn trace_with_returns<C>(&self, callable: &C, args: Vec<Value>) -> Result<Vec<Value>>
    where
        C: Callable + ?Sized,
    {
        callable.validate(&args)?;
        let identity = callable.identity();
        self.trace(&identity, || callable.invoke(args))
    }

    fn begin(&self, identity: &str) -> Invocation {
        let sampled = self.sampling.next(identity);
        let units_before = concurrency_units();

        let mut invocation = Invocation {
            sampled,
            started_at: Utc::now(),
            start: Instant::now(),
            units_before,
            heap_before: HeapStats::default(),
            paths: None,
            cpu: None,
        };
        if !sampled {
            return invocation;
        }

        invocation.heap_before = heap_stats();
        if let Err(e) = std::fs::create_dir_all(&self.profile_dir) {
            warn!(
                dir = %self.profile_dir.display(),
                error = %e,
                "Failed to create profile directory"
            );
        }

        let paths = ProfilePaths::for_identity(&self.profile_dir, identity);
        match self.profiler.start_cpu(&paths.cpu) {
            Ok(capture) => invocation.cpu = Some(capture),
            Err(e) => warn!(function = %identity, error = %e, "Could not start CPU profile"),
        }
        invocation.paths = Some(paths);

        // Restart the clock so profiler setup is not billed to the call
        invocation.start = Instant::now();
        invocation
    }

    fn finish(&self, identity: &str, invocation: Invocation) {
        let execution_time = invocation.start.elapsed();

        let mut cpu_written = false;
        if let Some(capture) = invocation.cpu {
            match capture.finish() {
                Ok(()) => cpu_written = true,
                Err(e) => warn!(function = %identity, error = %e, "Failed to write CPU profile"),
            }
        }

        let mut memory_usage = 0;
        let mut mem_written = false;
        if let Some(paths) = &invocation.paths {
            let heap_after = heap_stats();
            memory_usage = heap_after
                .in_use_bytes
                .saturating_sub(invocation.heap_before.in_use_bytes);
            match self.profiler.write_heap(&paths.mem, &heap_after) {
                Ok(()) => mem_written = true,
                Err(e) => warn!(function = %identity, error = %e, "Failed to write heap profile"),
            }
        }

        let concurrency_delta = concurrency_units().saturating_sub(invocation.units_before);

        // Only artifacts that exist on disk are renderable
        let (cpu_path, mem_path) = match invocation.paths {
            Some(paths) => (
                (cpu_written && paths.cpu.is_file()).then_some(paths.cpu),
                (mem_written && paths.mem.is_file()).then_some(paths.mem),
            ),
            None => (None, None),
        };

        let mut functions = self.functions.lock();
        let (record, evicted) = functions.get_or_insert_with(identity, || FunctionMetricRecord {
            last_ran_at: invocation.started_at,
            execution_time: Duration::ZERO,
            concurrency_delta: 0,
            memory_usage: 0,
            cpu_profile_path: None,
            mem_profile_path: None,
        });

        record.last_ran_at = invocation.started_at;
        record.execution_time = execution_time;
        record.concurrency_delta = concurrency_delta;
        if invocation.sampled {
            record.memory_usage = memory_usage;
            record.cpu_profile_path = cpu_path;
            record.mem_profile_path = mem_path;
        }

        if let Some(evicted) = evicted {
            debug!(function = %evicted, "Evicted function record");
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Copy of the whole function table
    pub fn summary(&self) -> HashMap<String, FunctionMetricRecord> {
        self.functions
            .lock()
            .iter()
            .map(|(identity, record)| (identity.to_string(), record.clone()))
            .collect()
    }

    /// Copy of one function's record
    pub fn record(&self, identity: &str) -> Option<FunctionMetricRecord> {
        self.functions.lock().get(identity).cloned()
    }

    pub fn tracked_functions(&self) -> usize {
        self.functions.lock().len()
    }

    /// Invocations seen for an identity, while its counter is tracked
    pub fn invocation_count(&self, identity: &str) -> Option<u64> {
        self.sampling.count(identity)
    }

    pub fn sampling_rate(&self) -> u64 {
        self.sampling.rate()
    }

    /// Change the sampling rate; takes effect for subsequent calls
    pub fn set_sampling_rate(&self, rate: u64) {
        self.sampling.set_rate(rate);
        debug!(rate = self.sampling.rate(), "Sampling rate updated");
    }

    pub fn renderer(&self) -> &ProfileRenderer {
        &self.renderer
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// Render one stored profile of a function
    #[instrument(skip(self))]
    pub fn render_profile(&self, identity: &str, kind: ProfileKind, format: &str) -> Result<String> {
        let format: ReportFormat = format.parse()?;
        let path = self.profile_path(identity, kind)?;
        self.renderer.render(&path, format)
    }

    /// CPU report, memory report and source listing for a function.
    ///
    /// A missing renderer is reported inside the details rather than as an
    /// error, so the caller still learns which function was asked about.
    #[instrument(skip(self))]
    pub fn function_details(&self, identity: &str, format: &str) -> Result<FunctionTraceDetails> {
        let format: ReportFormat = format.parse()?;
        let record = self.record(identity).ok_or_else(|| Error::ProfileNotFound {
            identity: identity.to_string(),
            kind: "any".to_string(),
        })?;

        if let Err(e) = self.renderer.locate() {
            let message = format!("Error: {}", e);
            return Ok(FunctionTraceDetails {
                function_name: identity.to_string(),
                cpu_report: message.clone(),
                memory_report: message.clone(),
                code_trace: message,
            });
        }

        let render = |path: &Option<PathBuf>, kind: ProfileKind| match path {
            Some(path) => self
                .renderer
                .render(path, format)
                .unwrap_or_else(|e| format!("Error: {}", e)),
            None => format!("Error: no {} profile recorded yet", kind),
        };

        let code_trace = match &record.cpu_profile_path {
            Some(path) => self
                .renderer
                .list(path, identity)
                .unwrap_or_else(|e| format!("Error: {}", e)),
            None => String::new(),
        };

        Ok(FunctionTraceDetails {
            function_name: identity.to_string(),
            cpu_report: render(&record.cpu_profile_path, ProfileKind::Cpu),
            memory_report: render(&record.mem_profile_path, ProfileKind::Memory),
            code_trace,
        })
    }

    fn profile_path(&self, identity: &str, kind: ProfileKind) -> Result<PathBuf> {
        let not_found = || Error::ProfileNotFound {
            identity: identity.to_string(),
            kind: kind.to_string(),
        };
        let record = self.record(identity).ok_or_else(not_found)?;
        let path = match kind {
            ProfileKind::Cpu => record.cpu_profile_path,
            ProfileKind::Memory => record.mem_profile_path,
        };
        path.ok_or_else(not_found)
    }
}

// =============================================================================
// Tests
// =============================================================================
