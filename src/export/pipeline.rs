//! Export Pipeline
//!
//! One background task per pipeline. Every interval it snapshots the
//! registry and hands a non-empty snapshot to the exporter. Export errors
//! are logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::Exporter;
use crate::error::Result;
use crate::metrics::MetricRegistry;

/// Scheduled registry-to-exporter loop
pub struct ExportPipeline {
    registry: Arc<MetricRegistry>,
    exporter: Arc<dyn Exporter>,
    interval: Duration,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for ExportPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportPipeline")
            .field("exporter", &self.exporter.name())
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ExportPipeline {
    pub fn new(
        registry: Arc<MetricRegistry>,
        exporter: Arc<dyn Exporter>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            exporter,
            interval: interval.max(Duration::from_millis(1)),
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the export loop under `parent`.
    ///
    /// Cancelling `parent` ends the loop just like [`stop`](Self::stop).
    /// Returns false if the loop is already running.
    pub fn start(&self, parent: &CancellationToken) -> bool {
        let mut running = self.running.lock();
        if let Some((_, handle)) = running.as_ref() {
            if !handle.is_finished() {
                warn!("Export pipeline already running");
                return false;
            }
        }

        let token = parent.child_token();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.registry),
            Arc::clone(&self.exporter),
            self.interval,
            token.clone(),
        ));
        *running = Some((token, handle));
        true
    }

    /// Stop the loop and wait for it; safe to call repeatedly.
    ///
    /// Once this returns, no export started by the loop is still running.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some((token, handle)) = running else {
            return;
        };

        token.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "Export pipeline task failed");
        }
        info!("Export pipeline stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Run a single tick body; returns how many metrics were exported
    pub async fn export_once(&self) -> Result<usize> {
        export_snapshot(&self.registry, self.exporter.as_ref()).await
    }
}

async fn export_snapshot(registry: &MetricRegistry, exporter: &dyn Exporter) -> Result<usize> {
    let snapshot = registry.get_all();
    if snapshot.is_empty() {
        return Ok(0);
    }
    exporter.export(&snapshot).await?;
    Ok(snapshot.len())
}

#[instrument(skip_all, fields(exporter = %exporter.name()))]
async fn run_loop(
    registry: Arc<MetricRegistry>,
    exporter: Arc<dyn Exporter>,
    period: Duration,
    token: CancellationToken,
) {
    info!(interval = ?period, "Starting export pipeline");

    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; exports start one period in
    tick.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Export pipeline cancelled");
                break;
            }

            _ = tick.tick() => {
                match export_snapshot(&registry, exporter.as_ref()).await {
                    Ok(0) => debug!("Registry empty, skipping export"),
                    Ok(count) => debug!(metrics = count, "Exported snapshot"),
                    Err(e) => error!(error = %e, "Export failed"),
                }
            }
        }
    }
}
