//! Exporter Fan-out
//!
//! Hands one snapshot to every registered backend in turn. A failing
//! backend never stops the ones after it; all failures come back together.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, error};

use crate::domain::Exporter;
use crate::error::{ExportErrors, Result};
use crate::metrics::MetricValue;

/// Composite exporter delivering to N backends
#[derive(Default)]
pub struct FanoutExporter {
    exporters: RwLock<Vec<Arc<dyn Exporter>>>,
}

impl FanoutExporter {
    pub fn new(exporters: Vec<Arc<dyn Exporter>>) -> Self {
        Self {
            exporters: RwLock::new(exporters),
        }
    }

    /// Builder-style registration
    pub fn with_exporter(self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporters.write().push(exporter);
        self
    }

    /// Register another backend; it receives snapshots from the next export on
    pub fn add(&self, exporter: Arc<dyn Exporter>) {
        debug!(exporter = %exporter.name(), "Registered exporter");
        self.exporters.write().push(exporter);
    }

    /// Backend names in call order
    pub fn names(&self) -> Vec<String> {
        self.exporters
            .read()
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.exporters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.exporters.read().is_empty()
    }
}

impl std::fmt::Debug for FanoutExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutExporter")
            .field("exporters", &self.names())
            .finish()
    }
}

#[async_trait]
impl Exporter for FanoutExporter {
    async fn export(&self, snapshot: &[MetricValue]) -> Result<()> {
        // Never hold the lock across a backend's await
        let exporters: Vec<Arc<dyn Exporter>> = self.exporters.read().clone();

        let mut errors = ExportErrors::new();
        for exporter in &exporters {
            if let Err(e) = exporter.export(snapshot).await {
                error!(exporter = %exporter.name(), error = %e, "Exporter failed");
                errors.push(exporter.name(), e);
            }
        }
        errors.into_result()
    }

    fn name(&self) -> &str {
        "fanout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryExporter;
    use crate::error::Error;
    use crate::metrics::{Labels, MetricKind};
    use chrono::Utc;

    fn snapshot() -> Vec<MetricValue> {
        vec![MetricValue {
            name: "x".to_string(),
            value: 1.0,
            labels: Labels::new(),
            timestamp: Utc::now(),
            kind: MetricKind::Gauge,
        }]
    }

    #[tokio::test]
    async fn test_every_backend_sees_same_snapshot() {
        let a = Arc::new(InMemoryExporter::named("a"));
        let b = Arc::new(InMemoryExporter::named("b"));
        let fanout = FanoutExporter::new(vec![a.clone() as Arc<dyn Exporter>, b.clone()]);

        fanout.export(&snapshot()).await.unwrap();

        assert_eq!(a.exports(), 1);
        assert_eq!(b.exports(), 1);
        assert_eq!(a.last_snapshot(), b.last_snapshot());
    }

    #[tokio::test]
    async fn test_failure_does_not_short_circuit() {
        let failing = Arc::new(InMemoryExporter::named("b"));
        failing.fail_with("connection refused");
        let ok = Arc::new(InMemoryExporter::named("a"));

        let fanout = FanoutExporter::default()
            .with_exporter(failing.clone())
            .with_exporter(ok.clone());

        let err = fanout.export(&snapshot()).await.unwrap_err();

        assert_eq!(ok.exports(), 1);
        match err {
            Error::ExportFailed(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors.exporters().collect::<Vec<_>>(), vec!["b"]);
                assert!(errors.to_string().contains("connection refused"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_all_failures_are_kept() {
        let e1 = Arc::new(InMemoryExporter::named("e1"));
        e1.fail_with("e1 fail");
        let e2 = Arc::new(InMemoryExporter::named("e2"));
        e2.fail_with("e2 fail");
        let fanout = FanoutExporter::new(vec![e1 as Arc<dyn Exporter>, e2]);

        let text = fanout.export(&snapshot()).await.unwrap_err().to_string();
        assert!(text.contains("e1 fail"));
        assert!(text.contains("e2 fail"));
    }

    #[tokio::test]
    async fn test_empty_fanout_succeeds() {
        let fanout = FanoutExporter::default();
        assert!(fanout.is_empty());
        assert!(fanout.export(&snapshot()).await.is_ok());
        assert_eq!(fanout.name(), "fanout");
    }

    #[test]
    fn test_add_after_construction() {
        let fanout = FanoutExporter::default();
        fanout.add(Arc::new(InMemoryExporter::named("late")));
        assert_eq!(fanout.names(), vec!["late"]);
    }
}
