//! OTLP Push Exporter
//!
//! Implements the `Exporter` port on top of the OpenTelemetry SDK. Each
//! export records the snapshot into OTel instruments; the SDK's periodic
//! reader batches and ships them over gRPC on its own interval.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use opentelemetry::metrics::{Counter, Gauge, Meter, MeterProvider as _};
use opentelemetry::KeyValue;
use opentelemetry_otlp::{MetricExporter, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::Resource;
use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};
use tonic::transport::ClientTlsConfig;
use tracing::{debug, info};

use crate::config::OtlpConfig;
use crate::domain::Exporter;
use crate::error::{Error, Result};
use crate::metrics::{MetricKind, MetricValue};

const METER_NAME: &str = "pulsetrace";

/// Cached OTel instrument for one metric name
#[derive(Debug)]
enum Instrument {
    Gauge(Gauge<f64>),
    Counter(Counter<f64>),
}

/// Push-style exporter speaking OTLP/gRPC.
///
/// Instruments are created the first time a metric name is seen and reused
/// afterwards. Registry counters are cumulative, so each export adds only
/// the growth since the previous export of that name. Names missing from
/// a snapshot are dropped from both caches, so a metric deleted from the
/// registry and later re-created starts again from zero.
pub struct OtlpExporter {
    meter: Meter,
    provider: Option<SdkMeterProvider>,
    instruments: DashMap<String, Instrument>,
    counter_totals: DashMap<String, f64>,
}

impl std::fmt::Debug for OtlpExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtlpExporter")
            .field("instruments", &self.instruments.len())
            .field("owns_provider", &self.provider.is_some())
            .finish()
    }
}

impl OtlpExporter {
    /// Connect a periodic OTLP/gRPC pipeline to `config.endpoint`.
    ///
    /// Must be called inside a tokio runtime; the connection itself is
    /// established lazily on the first push.
    pub fn new(config: &OtlpConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = MetricExporter::builder()
            .with_tonic()
            .with_endpoint(config.endpoint_url())
            .with_metadata(metadata(&config.headers)?);
        if !config.insecure {
            builder = builder.with_tls_config(ClientTlsConfig::new().with_enabled_roots());
        }
        let exporter = builder
            .build()
            .map_err(|e| Error::ExporterInit(format!("OTLP exporter: {}", e)))?;

        let reader = PeriodicReader::builder(exporter)
            .with_interval(config.push_interval)
            .build();
        let provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(Resource::builder().with_service_name(METER_NAME).build())
            .build();

        info!(
            endpoint = %config.endpoint_url(),
            interval = ?config.push_interval,
            "OTLP exporter configured"
        );

        let meter = provider.meter(METER_NAME);
        Ok(Self {
            meter,
            provider: Some(provider),
            instruments: DashMap::new(),
            counter_totals: DashMap::new(),
        })
    }

    /// Record into an externally owned meter (no provider lifecycle)
    pub fn with_meter(meter: Meter) -> Self {
        Self {
            meter,
            provider: None,
            instruments: DashMap::new(),
            counter_totals: DashMap::new(),
        }
    }

    /// Number of cached instruments
    pub fn instrument_count(&self) -> usize {
        self.instruments.len()
    }

    /// Push everything recorded so far without waiting for the next interval
    pub fn flush(&self) -> Result<()> {
        match &self.provider {
            Some(provider) => provider.force_flush().map_err(|e| self.failure(e)),
            None => Ok(()),
        }
    }

    /// Flush and shut the SDK pipeline down
    pub fn shutdown(&self) -> Result<()> {
        match &self.provider {
            Some(provider) => provider.shutdown().map_err(|e| self.failure(e)),
            None => Ok(()),
        }
    }

    fn failure(&self, e: impl std::fmt::Display) -> Error {
        Error::Export {
            exporter: self.name().to_string(),
            reason: e.to_string(),
        }
    }

    /// Cached instrument for `name`, rebuilt when the metric kind changed.
    ///
    /// The meter itself never forgets an instrument. After a kind change
    /// the old instrument stays registered under the same name, and the
    /// SDK may log a duplicate-instrument conflict for it.
    fn instrument(&self, name: &str, counter: bool) -> RefMut<'_, String, Instrument> {
        let mut slot = self
            .instruments
            .entry(name.to_string())
            .or_insert_with(|| self.build_instrument(name, counter));

        // The registry replaces kinds in place; follow it
        let same_kind = matches!(
            (&*slot, counter),
            (Instrument::Counter(_), true) | (Instrument::Gauge(_), false)
        );
        if !same_kind {
            debug!(metric = %name, "Metric kind changed, replacing instrument");
            *slot = self.build_instrument(name, counter);
        }
        slot
    }

    fn build_instrument(&self, name: &str, counter: bool) -> Instrument {
        if counter {
            Instrument::Counter(self.meter.f64_counter(name.to_string()).build())
        } else {
            Instrument::Gauge(self.meter.f64_gauge(name.to_string()).build())
        }
    }

    /// Growth of a cumulative counter since its last export.
    ///
    /// A total that went down means the counter was recreated; its whole
    /// new value counts as growth.
    fn counter_delta(&self, name: &str, total: f64) -> f64 {
        let mut last = self.counter_totals.entry(name.to_string()).or_insert(0.0);
        let delta = if total >= *last {
            total - *last
        } else {
            total.max(0.0)
        };
        *last = total;
        delta
    }

    fn record(&self, metric: &MetricValue) {
        let mut labels: Vec<_> = metric.labels.iter().collect();
        labels.sort();
        let attributes: Vec<KeyValue> = labels
            .into_iter()
            .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
            .collect();

        match metric.kind {
            MetricKind::Counter => {
                let delta = self.counter_delta(&metric.name, metric.value);
                if let Instrument::Counter(counter) = &*self.instrument(&metric.name, true) {
                    if delta > 0.0 {
                        counter.add(delta, &attributes);
                    }
                }
            }
            // Histogram placeholders carry a single value; a gauge is the honest shape
            MetricKind::Gauge | MetricKind::Histogram => {
                self.counter_totals.remove(&metric.name);
                if let Instrument::Gauge(gauge) = &*self.instrument(&metric.name, false) {
                    gauge.record(metric.value, &attributes);
                }
            }
        }
    }
}

/// Request metadata from configured headers
fn metadata(headers: &HashMap<String, String>) -> Result<MetadataMap> {
    let mut map = MetadataMap::new();
    for (key, value) in headers {
        let key = MetadataKey::<Ascii>::from_bytes(key.to_ascii_lowercase().as_bytes())
            .map_err(|e| Error::Config(format!("invalid OTLP header name {:?}: {}", key, e)))?;
        let value = MetadataValue::try_from(value.as_str())
            .map_err(|e| Error::Config(format!("invalid OTLP header value for {:?}: {}", key, e)))?;
        map.insert(key, value);
    }
    Ok(map)
}

#[async_trait]
impl Exporter for OtlpExporter {
    async fn export(&self, snapshot: &[MetricValue]) -> Result<()> {
        for metric in snapshot {
            self.record(metric);
        }

        let live: HashSet<&str> = snapshot.iter().map(|m| m.name.as_str()).collect();
        self.instruments.retain(|name, _| live.contains(name.as_str()));
        self.counter_totals.retain(|name, _| live.contains(name.as_str()));

        debug!(metrics = snapshot.len(), "Recorded snapshot into OTLP instruments");
        Ok(())
    }

    fn name(&self) -> &str {
        "otlp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Labels;
    use chrono::Utc;
    use opentelemetry_sdk::metrics::InMemoryMetricExporter;

    fn create_test_provider() -> (SdkMeterProvider, InMemoryMetricExporter) {
        let exporter = InMemoryMetricExporter::default();
        let reader = PeriodicReader::builder(exporter.clone()).build();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();
        (provider, exporter)
    }

    fn metric(name: &str, value: f64, kind: MetricKind) -> MetricValue {
        let mut labels = Labels::new();
        labels.insert("host".to_string(), "localhost".to_string());
        MetricValue {
            name: name.to_string(),
            value,
            labels,
            timestamp: Utc::now(),
            kind,
        }
    }

    #[tokio::test]
    async fn test_export_records_instruments() {
        let (provider, exporter) = create_test_provider();
        let otlp = OtlpExporter::with_meter(provider.meter("test"));

        otlp.export(&[
            metric("cpu_usage", 42.5, MetricKind::Gauge),
            metric("requests", 3.0, MetricKind::Counter),
            metric("latency", 0.2, MetricKind::Histogram),
        ])
        .await
        .unwrap();

        assert_eq!(otlp.instrument_count(), 3);
        provider.force_flush().unwrap();
        let metrics = exporter.get_finished_metrics().unwrap();
        assert!(!metrics.is_empty());
    }

    #[tokio::test]
    async fn test_instruments_are_cached() {
        let (provider, _exporter) = create_test_provider();
        let otlp = OtlpExporter::with_meter(provider.meter("test"));

        for value in [1.0, 2.0, 3.0] {
            otlp.export(&[metric("cpu_usage", value, MetricKind::Gauge)])
                .await
                .unwrap();
        }
        assert_eq!(otlp.instrument_count(), 1);
    }

    #[test]
    fn test_counter_delta() {
        let (provider, _exporter) = create_test_provider();
        let otlp = OtlpExporter::with_meter(provider.meter("test"));

        assert_eq!(otlp.counter_delta("c", 5.0), 5.0);
        assert_eq!(otlp.counter_delta("c", 8.0), 3.0);
        assert_eq!(otlp.counter_delta("c", 8.0), 0.0);
        // Recreated counter
        assert_eq!(otlp.counter_delta("c", 2.0), 2.0);
    }

    #[test]
    fn test_kind_change_replaces_instrument() {
        let (provider, _exporter) = create_test_provider();
        let otlp = OtlpExporter::with_meter(provider.meter("test"));

        assert!(matches!(*otlp.instrument("x", false), Instrument::Gauge(_)));
        assert!(matches!(*otlp.instrument("x", true), Instrument::Counter(_)));
        assert_eq!(otlp.instrument_count(), 1);
    }

    #[tokio::test]
    async fn test_vanished_metrics_are_pruned() {
        let (provider, _exporter) = create_test_provider();
        let otlp = OtlpExporter::with_meter(provider.meter("test"));

        otlp.export(&[
            metric("kept", 1.0, MetricKind::Gauge),
            metric("dropped", 5.0, MetricKind::Counter),
        ])
        .await
        .unwrap();
        assert_eq!(otlp.instrument_count(), 2);

        otlp.export(&[metric("kept", 2.0, MetricKind::Gauge)])
            .await
            .unwrap();
        assert_eq!(otlp.instrument_count(), 1);
        assert!(!otlp.instruments.contains_key("dropped"));
        assert!(!otlp.counter_totals.contains_key("dropped"));

        // Re-created counter counts its full value again
        assert_eq!(otlp.counter_delta("dropped", 5.0), 5.0);
    }

    #[test]
    fn test_metadata_from_headers() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer token".to_string());

        let map = metadata(&headers).unwrap();
        assert_eq!(
            map.get("authorization").unwrap().to_str().unwrap(),
            "Bearer token"
        );

        headers.insert("bad header".to_string(), "x".to_string());
        assert!(metadata(&headers).is_err());
    }

    #[test]
    fn test_shutdown_without_provider() {
        let (provider, _exporter) = create_test_provider();
        let otlp = OtlpExporter::with_meter(provider.meter("test"));
        assert!(otlp.shutdown().is_ok());
        assert_eq!(otlp.name(), "otlp");
    }
}
