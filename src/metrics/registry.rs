//! Metric Registry
//!
//! Latest-value store for scalar metrics, one entry per name. All reads hand
//! back independent copies; no caller ever holds a live reference into the
//! map.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::DEFAULT_MAX_TRACKED_METRICS;

/// Label set attached to a metric
pub type Labels = HashMap<String, String>;

// =============================================================================
// Metric Value
// =============================================================================

/// Kind discriminator for a stored metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Writes replace the stored value
    Gauge,
    /// Writes add to the stored value
    Counter,
    /// Placeholder: writes replace, no buckets or quantiles
    Histogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Histogram => write!(f, "histogram"),
        }
    }
}

/// Latest value of a named metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub name: String,
    pub value: f64,
    pub labels: Labels,
    /// Time of the last write
    pub timestamp: DateTime<Utc>,
    pub kind: MetricKind,
}

impl MetricValue {
    fn new(name: &str, value: f64, labels: Labels, kind: MetricKind) -> Self {
        Self {
            name: name.to_string(),
            value,
            labels,
            timestamp: Utc::now(),
            kind,
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Concurrency-safe mapping from metric name to its latest value.
///
/// One instance per process, handed to producers and the export pipeline by
/// reference. Bounded: once `max_metrics` distinct names exist, writes that
/// would introduce a new name are dropped with a warning while existing
/// names keep updating.
#[derive(Debug)]
pub struct MetricRegistry {
    metrics: RwLock<HashMap<String, MetricValue>>,
    max_metrics: usize,
}

impl MetricRegistry {
    /// Create a registry holding at most `max_metrics` names (minimum 1)
    pub fn new(max_metrics: usize) -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            max_metrics: max_metrics.max(1),
        }
    }

    pub fn max_metrics(&self) -> usize {
        self.max_metrics
    }

    /// Replace the stored value with a gauge reading
    pub fn set_gauge(&self, name: &str, value: f64, labels: Labels) {
        let mut metrics = self.metrics.write();
        if !self.admits(&metrics, name) {
            return;
        }
        metrics.insert(
            name.to_string(),
            MetricValue::new(name, value, labels, MetricKind::Gauge),
        );
    }

    /// Add `delta` to a counter, creating it on first sight.
    ///
    /// A name currently holding a non-counter value is replaced by a fresh
    /// counter starting at `delta`. Labels of an existing counter are kept.
    pub fn increment_counter(&self, name: &str, delta: f64, labels: Labels) {
        let mut metrics = self.metrics.write();
        if let Some(existing) = metrics.get_mut(name) {
            if existing.kind == MetricKind::Counter {
                existing.value += delta;
                existing.timestamp = Utc::now();
                return;
            }
        } else if !self.admits(&metrics, name) {
            return;
        }
        metrics.insert(
            name.to_string(),
            MetricValue::new(name, delta, labels, MetricKind::Counter),
        );
    }

    /// Record a histogram observation.
    ///
    /// Placeholder semantics: only the last observation is kept. There is no
    /// bucketing and no quantile support.
    pub fn record_histogram(&self, name: &str, value: f64, labels: Labels) {
        let mut metrics = self.metrics.write();
        if !self.admits(&metrics, name) {
            return;
        }
        metrics.insert(
            name.to_string(),
            MetricValue::new(name, value, labels, MetricKind::Histogram),
        );
    }

    /// Remove a metric; returns whether it existed
    pub fn delete(&self, name: &str) -> bool {
        self.metrics.write().remove(name).is_some()
    }

    /// Copy of one metric
    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.metrics.read().get(name).cloned()
    }

    /// Deep copy of every current value, in no particular order
    pub fn get_all(&self) -> Vec<MetricValue> {
        self.metrics.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }

    fn admits(&self, metrics: &HashMap<String, MetricValue>, name: &str) -> bool {
        if metrics.contains_key(name) || metrics.len() < self.max_metrics {
            return true;
        }
        warn!(
            metric = %name,
            cap = self.max_metrics,
            "Metric registry full, dropping write for new metric"
        );
        false
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRACKED_METRICS)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_set_gauge() {
        let registry = MetricRegistry::default();
        registry.set_gauge("cpu", 42.5, labels(&[("host", "localhost")]));

        let metrics = registry.get_all();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name, "cpu");
        assert_eq!(metrics[0].value, 42.5);
        assert_eq!(metrics[0].kind, MetricKind::Gauge);
        assert_eq!(metrics[0].labels.get("host").unwrap(), "localhost");
    }

    #[test]
    fn test_set_gauge_overwrites() {
        let registry = MetricRegistry::default();
        registry.set_gauge("x", 10.0, Labels::new());
        registry.set_gauge("x", 20.0, Labels::new());

        let metrics = registry.get_all();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].value, 20.0);
    }

    #[test]
    fn test_increment_counter_accumulates() {
        let registry = MetricRegistry::default();
        registry.increment_counter("x", 1.0, Labels::new());
        registry.increment_counter("x", 5.0, Labels::new());

        let metric = registry.get("x").unwrap();
        assert_eq!(metric.value, 6.0);
        assert_eq!(metric.kind, MetricKind::Counter);
    }

    #[test]
    fn test_increment_counter_replaces_other_kinds() {
        let registry = MetricRegistry::default();
        registry.set_gauge("x", 100.0, Labels::new());
        registry.increment_counter("x", 3.0, Labels::new());

        let metric = registry.get("x").unwrap();
        assert_eq!(metric.value, 3.0);
        assert_eq!(metric.kind, MetricKind::Counter);
    }

    #[test]
    fn test_histogram_keeps_last_value() {
        let registry = MetricRegistry::default();
        registry.record_histogram("latency", 0.5, Labels::new());
        registry.record_histogram("latency", 0.2, Labels::new());

        let metric = registry.get("latency").unwrap();
        assert_eq!(metric.value, 0.2);
        assert_eq!(metric.kind, MetricKind::Histogram);
    }

    #[test]
    fn test_delete() {
        let registry = MetricRegistry::default();
        registry.set_gauge("x", 1.0, Labels::new());
        assert!(registry.delete("x"));
        assert!(!registry.delete("x"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_get_all_returns_copies() {
        let registry = MetricRegistry::default();
        registry.set_gauge("x", 1.0, labels(&[("a", "b")]));

        let mut snapshot = registry.get_all();
        snapshot[0].value = 99.0;
        snapshot[0].labels.insert("c".to_string(), "d".to_string());
        snapshot.clear();

        let again = registry.get_all();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].value, 1.0);
        assert_eq!(again[0].labels.len(), 1);
    }

    #[test]
    fn test_cap_drops_new_names_only() {
        let registry = MetricRegistry::new(2);
        registry.set_gauge("a", 1.0, Labels::new());
        registry.increment_counter("b", 1.0, Labels::new());
        registry.record_histogram("c", 1.0, Labels::new());

        assert_eq!(registry.len(), 2);
        assert!(registry.get("c").is_none());

        // Existing names keep updating at the cap
        registry.set_gauge("a", 2.0, Labels::new());
        registry.increment_counter("b", 1.0, Labels::new());
        assert_eq!(registry.get("a").unwrap().value, 2.0);
        assert_eq!(registry.get("b").unwrap().value, 2.0);
    }

    #[test]
    fn test_concurrent_counter_increments() {
        let registry = Arc::new(MetricRegistry::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        registry.increment_counter("hits", 1.0, Labels::new());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.get("hits").unwrap().value, 8000.0);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(MetricKind::Gauge.to_string(), "gauge");
        assert_eq!(MetricKind::Counter.to_string(), "counter");
        assert_eq!(MetricKind::Histogram.to_string(), "histogram");
    }
}
