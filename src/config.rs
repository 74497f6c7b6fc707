//! Telemetry Configuration
//!
//! The knobs this core consumes: sampling rate, export interval, profile
//! artifact directory, table caps, the external profile renderer and the
//! optional OTLP push endpoint.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default invocations per deep-profile sample
pub const DEFAULT_SAMPLING_RATE: u64 = 100;

/// Default cap on tracked function identities (and sampling counters)
pub const DEFAULT_MAX_TRACKED_FUNCTIONS: usize = 10_000;

/// Default cap on distinct metric names in the registry
pub const DEFAULT_MAX_TRACKED_METRICS: usize = 10_000;

/// Default export pipeline interval
pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(15);

/// Default OTLP periodic reader interval
pub const DEFAULT_PUSH_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// Telemetry Config
// =============================================================================

/// Top-level configuration for the telemetry core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelemetryConfig {
    /// Invocations per deep-profile sample (1 = every call)
    pub sampling_rate: u64,

    /// Export pipeline tick interval
    #[serde(with = "duration_str")]
    pub export_interval: Duration,

    /// Base directory; profiles land under `<base_dir>/profiles`
    pub base_dir: PathBuf,

    /// Cap on the function metric table and the sampling counter table
    pub max_tracked_functions: usize,

    /// Cap on distinct metric names in the registry
    pub max_tracked_metrics: usize,

    /// External profile-report renderer
    pub renderer: RendererConfig,

    /// Optional OTLP push backend
    pub otlp: Option<OtlpConfig>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sampling_rate: DEFAULT_SAMPLING_RATE,
            export_interval: DEFAULT_EXPORT_INTERVAL,
            base_dir: std::env::temp_dir().join("pulsetrace"),
            max_tracked_functions: DEFAULT_MAX_TRACKED_FUNCTIONS,
            max_tracked_metrics: DEFAULT_MAX_TRACKED_METRICS,
            renderer: RendererConfig::default(),
            otlp: None,
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("invalid YAML configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Reject values the core cannot run with.
    ///
    /// A zero sampling rate is not rejected; it is clamped to 1 where used.
    pub fn validate(&self) -> Result<()> {
        if self.export_interval.is_zero() {
            return Err(Error::Config("export interval must be non-zero".to_string()));
        }
        if self.max_tracked_functions == 0 {
            return Err(Error::Config(
                "max tracked functions must be at least 1".to_string(),
            ));
        }
        if self.max_tracked_metrics == 0 {
            return Err(Error::Config(
                "max tracked metrics must be at least 1".to_string(),
            ));
        }
        if self.renderer.program.trim().is_empty() {
            return Err(Error::Config("renderer program must not be empty".to_string()));
        }
        if let Some(otlp) = &self.otlp {
            otlp.validate()?;
        }
        Ok(())
    }

    /// Directory holding profile artifacts
    pub fn profile_dir(&self) -> PathBuf {
        self.base_dir.join("profiles")
    }
}

// =============================================================================
// Renderer Config
// =============================================================================

/// How to invoke the out-of-process profile renderer.
///
/// The command line is `<program> <args_prefix..> -<format> <profile path>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RendererConfig {
    pub program: String,
    pub args_prefix: Vec<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            program: "pprof".to_string(),
            args_prefix: Vec::new(),
        }
    }
}

impl RendererConfig {
    /// Use the Go toolchain's bundled copy (`go tool pprof`)
    pub fn go_toolchain() -> Self {
        Self {
            program: "go".to_string(),
            args_prefix: vec!["tool".to_string(), "pprof".to_string()],
        }
    }
}

// =============================================================================
// OTLP Config
// =============================================================================

/// Push-style OTLP/gRPC endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OtlpConfig {
    /// `host:port` (a scheme is added from `insecure` when missing)
    pub endpoint: String,

    /// Extra request metadata, e.g. authentication
    #[serde(skip_serializing)]
    pub headers: HashMap<String, String>,

    /// Plaintext transport instead of TLS
    pub insecure: bool,

    /// Batching interval of the SDK's periodic reader
    #[serde(with = "duration_str")]
    pub push_interval: Duration,
}

impl Default for OtlpConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:4317".to_string(),
            headers: HashMap::new(),
            insecure: true,
            push_interval: DEFAULT_PUSH_INTERVAL,
        }
    }
}

impl OtlpConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::Config("OTLP endpoint must not be empty".to_string()));
        }
        if self.push_interval.is_zero() {
            return Err(Error::Config("OTLP push interval must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Endpoint URL with the scheme implied by the transport-security flag
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else if self.insecure {
            format!("http://{}", self.endpoint)
        } else {
            format!("https://{}", self.endpoint)
        }
    }
}

// =============================================================================
// Duration Parsing
// =============================================================================

/// Parse durations like "30s", "5m", "1h", "1d", "1h30m".
///
/// A trailing bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            num_buf.push(c);
            continue;
        }

        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        num_buf.clear();

        let multiplier = match c {
            'd' | 'D' => 86_400,
            'h' | 'H' => 3_600,
            'm' | 'M' => 60,
            's' | 'S' => 1,
            _ => {
                return Err(Error::DurationParse(format!(
                    "unknown duration unit: {}",
                    c
                )))
            }
        };
        total_secs += num * multiplier;
    }

    if !num_buf.is_empty() {
        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        total_secs += num;
    }

    Ok(Duration::from_secs(total_secs))
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{}s", d.as_secs()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.sampling_rate, 100);
        assert_eq!(config.max_tracked_functions, 10_000);
        assert_eq!(config.export_interval, Duration::from_secs(15));
        assert!(config.profile_dir().ends_with("profiles"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_parse_duration_errors() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("m").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = TelemetryConfig {
            export_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TelemetryConfig {
            max_tracked_metrics: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
samplingRate: 10
exportInterval: 1m
baseDir: /tmp/pt
maxTrackedFunctions: 50
otlp:
  endpoint: collector:4317
  insecure: false
  pushInterval: 10s
"#;
        let config = TelemetryConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.sampling_rate, 10);
        assert_eq!(config.export_interval, Duration::from_secs(60));
        assert_eq!(config.max_tracked_functions, 50);
        assert_eq!(config.max_tracked_metrics, DEFAULT_MAX_TRACKED_METRICS);

        let otlp = config.otlp.unwrap();
        assert_eq!(otlp.endpoint_url(), "https://collector:4317");
        assert_eq!(otlp.push_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_otlp_endpoint_scheme() {
        let otlp = OtlpConfig::new("localhost:4317");
        assert_eq!(otlp.endpoint_url(), "http://localhost:4317");

        let explicit = OtlpConfig::new("https://otel.example.com:443");
        assert_eq!(explicit.endpoint_url(), "https://otel.example.com:443");
    }

    #[test]
    fn test_go_toolchain_renderer() {
        let renderer = RendererConfig::go_toolchain();
        assert_eq!(renderer.program, "go");
        assert_eq!(renderer.args_prefix, vec!["tool", "pprof"]);
    }
}
