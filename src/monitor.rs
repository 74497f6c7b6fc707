//! Monitor
//!
//! Composition root wiring the tracer, the registry and the export path
//! together. Everything is owned here and handed out by reference; there are
//! no process-wide singletons.
//!
//! ```text
//!   Tracer ──► function table ──► summary / details
//!   MetricRegistry ──► ExportPipeline ──► FanoutExporter ─┬─► PrometheusCollector
//!                                                         ├─► OtlpExporter (optional)
//!                                                         └─► extra exporters
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::adapters::{OtlpExporter, PrometheusCollector};
use crate::config::TelemetryConfig;
use crate::domain::{Exporter, Profiler};
use crate::error::{Error, Result};
use crate::export::{ExportPipeline, FanoutExporter};
use crate::metrics::{Labels, MetricRegistry};
use crate::tracer::{concurrency_units, default_profiler, heap_stats, Tracer, TracerConfig};

struct MonitorInner {
    config: TelemetryConfig,
    tracer: Arc<Tracer>,
    registry: Arc<MetricRegistry>,
    collector: Arc<PrometheusCollector>,
    fanout: Arc<FanoutExporter>,
    otlp: Option<Arc<OtlpExporter>>,
    pipeline: ExportPipeline,
}

/// Handle to a fully wired telemetry core; clones share state
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("tracer", &self.inner.tracer)
            .field("exporters", &self.inner.fanout.names())
            .field("running", &self.inner.pipeline.is_running())
            .finish()
    }
}

impl Monitor {
    /// Build the core with the platform's default profiler.
    ///
    /// With OTLP configured this must run inside a tokio runtime.
    pub fn new(config: TelemetryConfig) -> Result<Self> {
        Self::with_profiler(config, default_profiler())
    }

    /// Build the core with an injected profiler
    pub fn with_profiler(config: TelemetryConfig, profiler: Arc<dyn Profiler>) -> Result<Self> {
        config.validate()?;

        let tracer = Arc::new(Tracer::with_profiler(TracerConfig::from(&config), profiler));
        let registry = Arc::new(MetricRegistry::new(config.max_tracked_metrics));

        let collector = Arc::new(PrometheusCollector::new());
        let fanout = Arc::new(FanoutExporter::default());
        fanout.add(collector.clone());

        let otlp = match &config.otlp {
            Some(otlp_config) => {
                let otlp = Arc::new(OtlpExporter::new(otlp_config)?);
                fanout.add(otlp.clone());
                Some(otlp)
            }
            None => None,
        };

        let pipeline = ExportPipeline::new(
            Arc::clone(&registry),
            fanout.clone(),
            config.export_interval,
        );

        Ok(Self {
            inner: Arc::new(MonitorInner {
                config,
                tracer,
                registry,
                collector,
                fanout,
                otlp,
                pipeline,
            }),
        })
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.inner.config
    }

    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.inner.tracer
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.inner.registry
    }

    /// The always-present pull collector
    pub fn collector(&self) -> &Arc<PrometheusCollector> {
        &self.inner.collector
    }

    /// Names of every registered exporter, in call order
    pub fn exporters(&self) -> Vec<String> {
        self.inner.fanout.names()
    }

    /// Register an additional backend with the fan-out
    pub fn add_exporter(&self, exporter: Arc<dyn Exporter>) {
        self.inner.fanout.add(exporter);
    }

    /// Start the export pipeline; cancelling `token` stops it
    pub fn start(&self, token: &CancellationToken) -> bool {
        let started = self.inner.pipeline.start(token);
        if started {
            info!(
                interval = ?self.inner.config.export_interval,
                exporters = ?self.exporters(),
                "Telemetry monitor started"
            );
        }
        started
    }

    pub fn is_running(&self) -> bool {
        self.inner.pipeline.is_running()
    }

    /// Export the current registry contents right now
    pub async fn flush(&self) -> Result<usize> {
        self.inner.pipeline.export_once().await
    }

    /// Record the core's own runtime gauges into the registry
    pub fn record_runtime_metrics(&self) {
        let registry = &self.inner.registry;
        let heap = heap_stats();
        registry.set_gauge(
            "pulsetrace_tracked_functions",
            self.inner.tracer.tracked_functions() as f64,
            Labels::new(),
        );
        registry.set_gauge(
            "pulsetrace_live_tasks",
            concurrency_units() as f64,
            Labels::new(),
        );
        registry.set_gauge(
            "pulsetrace_heap_in_use_bytes",
            heap.in_use_bytes as f64,
            Labels::new(),
        );
        registry.set_gauge(
            "pulsetrace_sampling_rate",
            self.inner.tracer.sampling_rate() as f64,
            Labels::new(),
        );
    }

    /// Stop the pipeline, export one final snapshot and shut OTLP down
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.pipeline.stop().await;

        let flushed = self.flush().await;
        if let Err(e) = &flushed {
            warn!(error = %e, "Final export failed");
        }

        if let Some(otlp) = self.inner.otlp.clone() {
            // SDK shutdown blocks on its reader thread
            tokio::task::spawn_blocking(move || otlp.shutdown())
                .await
                .map_err(|e| Error::Internal(format!("OTLP shutdown task failed: {}", e)))??;
        }

        info!("Telemetry monitor shut down");
        flushed.map(|_| ())
    }
}
