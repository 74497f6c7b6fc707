//! Metrics module
//!
//! Provides the process-wide latest-value metric registry.

mod registry;

pub use registry::{Labels, MetricKind, MetricRegistry, MetricValue};
