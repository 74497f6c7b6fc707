//! Error types for the telemetry core

use std::fmt;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the telemetry core
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Argument-shape Errors
    // =========================================================================
    /// Wrong number of arguments supplied to a captured callable
    #[error("argument count mismatch: expected {expected}, got {got}")]
    ArgumentCount { expected: usize, got: usize },

    /// Argument not assignable to the declared parameter type
    #[error("argument {index} type mismatch: expected {expected}, got {got}")]
    ArgumentType {
        index: usize,
        expected: &'static str,
        got: &'static str,
    },

    // =========================================================================
    // Bookkeeping Errors
    // =========================================================================
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Profile capture could not be started or written
    #[error("Profile capture failed: {0}")]
    ProfileCapture(String),

    // =========================================================================
    // Export Errors
    // =========================================================================
    /// A single exporter backend failed
    #[error("Exporter {exporter} failed: {reason}")]
    Export { exporter: String, reason: String },

    /// One or more backends of a fan-out failed
    #[error("{0}")]
    ExportFailed(ExportErrors),

    /// Exporter backend could not be constructed
    #[error("Exporter initialization failed: {0}")]
    ExporterInit(String),

    // =========================================================================
    // Lookup / Rendering Errors
    // =========================================================================
    /// No profile recorded for the identity
    #[error("No {kind} profile recorded for function: {identity}")]
    ProfileNotFound { identity: String, kind: String },

    /// Report format outside the allow-list
    #[error("Unsupported report format: {0}")]
    InvalidReportFormat(String),

    /// External profile renderer cannot be located
    #[error("Profile renderer unavailable: {0}")]
    RendererUnavailable(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Lookup errors (unknown identity or missing profile path)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ProfileNotFound { .. })
    }

    /// Caller supplied something we refuse to act on
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Error::InvalidReportFormat(_) | Error::ArgumentCount { .. } | Error::ArgumentType { .. }
        )
    }

    /// An external tool or backend is missing
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::RendererUnavailable(_))
    }
}

/// Composite of every backend failure from one fan-out export.
///
/// Keeps each `(exporter, error)` pair so no single backend's detail is lost.
#[derive(Debug, Default)]
pub struct ExportErrors {
    failures: Vec<(String, Error)>,
}

impl ExportErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, exporter: impl Into<String>, error: Error) {
        self.failures.push((exporter.into(), error));
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failed backend names, in the order they were called
    pub fn exporters(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|(name, _)| name.as_str())
    }

    pub fn failures(&self) -> &[(String, Error)] {
        &self.failures
    }

    /// `Ok(())` when nothing failed, otherwise the composite as an error
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::ExportFailed(self))
        }
    }
}

impl fmt::Display for ExportErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} exporter(s) failed", self.failures.len())?;
        for (name, error) in &self.failures {
            write!(f, "; {}: {}", name, error)?;
        }
        Ok(())
    }
}
