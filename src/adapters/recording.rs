//! Recording Exporters
//!
//! Backends that keep or log snapshots instead of shipping them anywhere.
//! Useful for development, debugging and tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::domain::Exporter;
use crate::error::{Error, Result};
use crate::metrics::MetricValue;

/// Logging-based exporter.
///
/// Writes every metric of every snapshot to the tracing system.
#[derive(Debug, Clone, Default)]
pub struct LoggingExporter {
    /// Log at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info_level() -> Self {
        Self { info_level: true }
    }

    pub fn debug_level() -> Self {
        Self { info_level: false }
    }
}

#[async_trait]
impl Exporter for LoggingExporter {
    async fn export(&self, snapshot: &[MetricValue]) -> Result<()> {
        for metric in snapshot {
            let labels = serde_json::to_string(&metric.labels).unwrap_or_default();
            if self.info_level {
                info!(metric = %metric.name, kind = %metric.kind, value = metric.value, labels = %labels, "Metric");
            } else {
                debug!(metric = %metric.name, kind = %metric.kind, value = metric.value, labels = %labels, "Metric");
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// In-memory exporter for tests.
///
/// Keeps every snapshot it is handed. A failure can be injected, in which
/// case the snapshot is still recorded and the export then fails.
#[derive(Debug)]
pub struct InMemoryExporter {
    name: String,
    snapshots: RwLock<Vec<Vec<MetricValue>>>,
    failure: RwLock<Option<String>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            snapshots: RwLock::new(Vec::new()),
            failure: RwLock::new(None),
        }
    }

    /// Make every following export fail with `reason`
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.write() = Some(reason.into());
    }

    /// Let exports succeed again
    pub fn recover(&self) {
        *self.failure.write() = None;
    }

    /// Number of export calls received
    pub fn exports(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn snapshots(&self) -> Vec<Vec<MetricValue>> {
        self.snapshots.read().clone()
    }

    pub fn last_snapshot(&self) -> Option<Vec<MetricValue>> {
        self.snapshots.read().last().cloned()
    }

    pub fn clear(&self) {
        self.snapshots.write().clear();
    }
}

impl Default for InMemoryExporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Exporter for InMemoryExporter {
    async fn export(&self, snapshot: &[MetricValue]) -> Result<()> {
        self.snapshots.write().push(snapshot.to_vec());

        match self.failure.read().as_ref() {
            Some(reason) => Err(Error::Export {
                exporter: self.name.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Labels, MetricKind};
    use chrono::Utc;

    fn metric(name: &str) -> MetricValue {
        MetricValue {
            name: name.to_string(),
            value: 1.0,
            labels: Labels::new(),
            timestamp: Utc::now(),
            kind: MetricKind::Counter,
        }
    }

    #[tokio::test]
    async fn test_logging_exporter() {
        let exporter = LoggingExporter::info_level();

        // Should not panic
        exporter.export(&[metric("a")]).await.unwrap();
        assert_eq!(exporter.name(), "logging");
    }

    #[tokio::test]
    async fn test_in_memory_exporter() {
        let exporter = InMemoryExporter::new();
        assert_eq!(exporter.exports(), 0);

        exporter.export(&[metric("a")]).await.unwrap();
        exporter.export(&[metric("a"), metric("b")]).await.unwrap();

        assert_eq!(exporter.exports(), 2);
        assert_eq!(exporter.last_snapshot().unwrap().len(), 2);

        exporter.clear();
        assert!(exporter.last_snapshot().is_none());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let exporter = InMemoryExporter::named("flaky");
        exporter.fail_with("boom");

        let err = exporter.export(&[metric("a")]).await.unwrap_err();
        assert_eq!(err.to_string(), "Exporter flaky failed: boom");
        assert_eq!(exporter.exports(), 1);

        exporter.recover();
        assert!(exporter.export(&[metric("a")]).await.is_ok());
    }
}
