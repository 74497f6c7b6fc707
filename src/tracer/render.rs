//! Out-of-process profile rendering
//!
//! Stored profiles are turned into human-readable reports by an external
//! renderer (`pprof` by default). Only allow-listed report formats are ever
//! passed on its command line.

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RendererConfig;
use crate::error::{Error, Result};

// =============================================================================
// Report Selectors
// =============================================================================

/// Which of a function's two profiles to render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Cpu,
    Memory,
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileKind::Cpu => write!(f, "cpu"),
            ProfileKind::Memory => write!(f, "memory"),
        }
    }
}

/// Report formats the renderer may be asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Top,
    Tree,
    Raw,
    Traces,
}

impl ReportFormat {
    pub const ALL: [ReportFormat; 5] = [
        ReportFormat::Text,
        ReportFormat::Top,
        ReportFormat::Tree,
        ReportFormat::Raw,
        ReportFormat::Traces,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Text => "text",
            ReportFormat::Top => "top",
            ReportFormat::Tree => "tree",
            ReportFormat::Raw => "raw",
            ReportFormat::Traces => "traces",
        }
    }

    /// Command-line switch for this format
    pub fn flag(&self) -> String {
        format!("-{}", self.as_str())
    }
}

impl FromStr for ReportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::InvalidReportFormat(s.to_string()))
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendered reports for one traced function
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionTraceDetails {
    pub function_name: String,
    pub cpu_report: String,
    pub memory_report: String,
    /// Source-level listing for the function's symbol
    pub code_trace: String,
}

// =============================================================================
// Renderer
// =============================================================================

/// Invokes the configured renderer on profile files
#[derive(Debug, Clone)]
pub struct ProfileRenderer {
    config: RendererConfig,
}

impl ProfileRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Resolve the renderer program, searching `PATH` for bare names
    pub fn locate(&self) -> Result<PathBuf> {
        find_program(&self.config.program)
            .ok_or_else(|| Error::RendererUnavailable(self.config.program.clone()))
    }

    /// Render a profile in one of the allow-listed formats
    pub fn render(&self, profile: &Path, format: ReportFormat) -> Result<String> {
        let program = self.locate()?;
        Ok(self.run(&program, &[OsString::from(format.flag()), profile.into()]))
    }

    /// Source listing for the symbol behind a function identity
    pub fn list(&self, profile: &Path, identity: &str) -> Result<String> {
        let program = self.locate()?;
        let pattern = escape_regex(symbol_of(identity));
        Ok(self.run(
            &program,
            &[
                OsString::from("-list"),
                OsString::from(pattern),
                profile.into(),
            ],
        ))
    }

    /// Run the renderer; failures come back as an error report body
    fn run(&self, program: &Path, args: &[OsString]) -> String {
        debug!(program = %program.display(), ?args, "Invoking profile renderer");

        let output = Command::new(program)
            .args(&self.config.args_prefix)
            .args(args)
            .output();

        match output {
            Ok(output) => {
                let mut report = String::from_utf8_lossy(&output.stdout).into_owned();
                report.push_str(&String::from_utf8_lossy(&output.stderr));
                if output.status.success() {
                    report
                } else {
                    warn!(status = %output.status, "Profile renderer exited unsuccessfully");
                    format!(
                        "Error executing {}: {}\nOutput: {}",
                        self.config.program, output.status, report
                    )
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to run profile renderer");
                format!("Error executing {}: {}", self.config.program, e)
            }
        }
    }
}

impl Default for ProfileRenderer {
    fn default() -> Self {
        Self::new(RendererConfig::default())
    }
}

/// Locate an executable: paths are checked directly, bare names via `PATH`
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .flat_map(|dir| {
            let plain = dir.join(program);
            let exe = dir.join(format!("{}.exe", program));
            [plain, exe]
        })
        .find(|p| p.is_file())
}

/// Function path without the signature suffix
fn symbol_of(identity: &str) -> &str {
    let end = identity.find(['(', '-']).unwrap_or(identity.len());
    &identity[..end]
}

fn escape_regex(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_report_format_allow_list() {
        assert_eq!("text".parse::<ReportFormat>().unwrap(), ReportFormat::Text);
        assert_eq!("TOP".parse::<ReportFormat>().unwrap(), ReportFormat::Top);
        assert_eq!(ReportFormat::Traces.flag(), "-traces");

        for bad in ["svg", "web", "list", "-text", "text; rm -rf /", ""] {
            assert_matches!(bad.parse::<ReportFormat>(), Err(Error::InvalidReportFormat(_)));
        }
    }

    #[test]
    fn test_symbol_of_strips_signature() {
        assert_eq!(symbol_of("app::work(i32)->(bool)"), "app::work");
        assert_eq!(symbol_of("app::work->(bool)"), "app::work");
        assert_eq!(symbol_of("app::work"), "app::work");
    }

    #[test]
    fn test_escape_regex() {
        assert_eq!(escape_regex("a::b::{{closure}}"), "a::b::\\{\\{closure\\}\\}");
        assert_eq!(escape_regex("x.y"), "x\\.y");
    }

    #[test]
    fn test_missing_program_is_unavailable() {
        let renderer = ProfileRenderer::new(RendererConfig {
            program: "definitely-not-a-real-renderer-binary".to_string(),
            args_prefix: Vec::new(),
        });
        let err = renderer
            .render(Path::new("/tmp/none.prof"), ReportFormat::Text)
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[cfg(unix)]
    #[test]
    fn test_render_passes_format_and_path() {
        // `echo` stands in for the renderer and reflects its arguments
        let renderer = ProfileRenderer::new(RendererConfig {
            program: "echo".to_string(),
            args_prefix: vec!["tool".to_string()],
        });
        let report = renderer
            .render(Path::new("/tmp/f_cpu.prof"), ReportFormat::Top)
            .unwrap();
        assert_eq!(report.trim(), "tool -top /tmp/f_cpu.prof");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_render_becomes_error_report() {
        let renderer = ProfileRenderer::new(RendererConfig {
            program: "false".to_string(),
            args_prefix: Vec::new(),
        });
        let report = renderer
            .render(Path::new("/tmp/f_cpu.prof"), ReportFormat::Text)
            .unwrap();
        assert!(report.starts_with("Error executing false"));
    }
}
