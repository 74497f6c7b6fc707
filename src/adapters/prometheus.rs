//! Prometheus Pull Collector
//!
//! Implements the `Exporter` port as a pull-style sink: each export replaces
//! the stored snapshot, and scrapes read whatever was stored last.

use async_trait::async_trait;
use parking_lot::RwLock;
use prometheus::core::Collector;
use prometheus::{Counter, Encoder, Gauge, Opts, Registry, TextEncoder};
use serde::Serialize;
use tracing::warn;

use crate::domain::Exporter;
use crate::error::{Error, Result};
use crate::metrics::{Labels, MetricKind, MetricValue};

/// One scraped metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapeRecord {
    pub name: String,
    pub value: f64,
    pub kind: MetricKind,
    pub labels: Labels,
}

/// Pull-style collector backed by the latest exported snapshot
#[derive(Debug, Default)]
pub struct PrometheusCollector {
    snapshot: RwLock<Vec<MetricValue>>,
}

impl PrometheusCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot as scrape records
    pub fn scrape(&self) -> Vec<ScrapeRecord> {
        self.snapshot
            .read()
            .iter()
            .map(|m| ScrapeRecord {
                name: m.name.clone(),
                value: m.value,
                kind: m.kind,
                labels: m.labels.clone(),
            })
            .collect()
    }

    /// Content type of [`render_text`](Self::render_text) output
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    /// Latest snapshot in the Prometheus text exposition format.
    ///
    /// Counters stay counters; gauges and histogram placeholders are
    /// exposed as gauges. Metrics the format cannot represent are skipped
    /// with a warning.
    pub fn render_text(&self) -> Result<String> {
        let registry = Registry::new();
        for metric in self.snapshot.read().iter() {
            if let Err(e) = register_metric(&registry, metric) {
                warn!(metric = %metric.name, error = %e, "Skipping metric in scrape");
            }
        }

        let families = registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Internal(format!("Metrics output is not UTF-8: {}", e)))
    }
}

fn register_metric(registry: &Registry, metric: &MetricValue) -> prometheus::Result<()> {
    let opts = Opts::new(metric.name.as_str(), format!("pulsetrace {}", metric.kind))
        .const_labels(metric.labels.clone());

    // Prometheus counters cannot go down; anything else reads as a gauge
    let collector: Box<dyn Collector> =
        if metric.kind == MetricKind::Counter && metric.value >= 0.0 {
            let counter = Counter::with_opts(opts)?;
            counter.inc_by(metric.value);
            Box::new(counter)
        } else {
            let gauge = Gauge::with_opts(opts)?;
            gauge.set(metric.value);
            Box::new(gauge)
        };
    registry.register(collector)
}

#[async_trait]
impl Exporter for PrometheusCollector {
    async fn export(&self, snapshot: &[MetricValue]) -> Result<()> {
        *self.snapshot.write() = snapshot.to_vec();
        Ok(())
    }

    fn name(&self) -> &str {
        "prometheus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metric(name: &str, value: f64, kind: MetricKind, labels: &[(&str, &str)]) -> MetricValue {
        MetricValue {
            name: name.to_string(),
            value,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            timestamp: Utc::now(),
            kind,
        }
    }

    #[tokio::test]
    async fn test_scrape_returns_latest_snapshot() {
        let collector = PrometheusCollector::new();
        assert!(collector.scrape().is_empty());

        collector
            .export(&[metric("cpu", 42.5, MetricKind::Gauge, &[])])
            .await
            .unwrap();
        collector
            .export(&[metric("cpu", 10.0, MetricKind::Gauge, &[])])
            .await
            .unwrap();

        let records = collector.scrape();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, 10.0);
        assert_eq!(records[0].kind, MetricKind::Gauge);
    }

    #[tokio::test]
    async fn test_render_text() {
        let collector = PrometheusCollector::new();
        collector
            .export(&[
                metric("requests_total", 6.0, MetricKind::Counter, &[("path", "/x")]),
                metric("queue_depth", 3.0, MetricKind::Gauge, &[]),
                metric("latency", 0.25, MetricKind::Histogram, &[]),
            ])
            .await
            .unwrap();

        let text = collector.render_text().unwrap();
        assert!(text.contains("# TYPE requests_total counter"));
        assert!(text.contains("requests_total{path=\"/x\"} 6"));
        assert!(text.contains("# TYPE queue_depth gauge"));
        assert!(text.contains("queue_depth 3"));
        assert!(text.contains("# TYPE latency gauge"));
    }

    #[tokio::test]
    async fn test_invalid_names_are_skipped() {
        let collector = PrometheusCollector::new();
        collector
            .export(&[
                metric("bad name!", 1.0, MetricKind::Gauge, &[]),
                metric("good_name", 2.0, MetricKind::Gauge, &[]),
            ])
            .await
            .unwrap();

        let text = collector.render_text().unwrap();
        assert!(text.contains("good_name 2"));
        assert!(!text.contains("bad name"));
    }

    #[tokio::test]
    async fn test_negative_counter_exposed_as_gauge() {
        let collector = PrometheusCollector::new();
        collector
            .export(&[metric("drift", -2.0, MetricKind::Counter, &[])])
            .await
            .unwrap();

        let text = collector.render_text().unwrap();
        assert!(text.contains("# TYPE drift gauge"));
    }
}
