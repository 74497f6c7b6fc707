//! Profile artifacts: file naming and the capture backends

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::{CpuCapture, HeapStats, Profiler};
use crate::error::Result;

/// Replace characters that are unsafe in file names with `_`
pub fn sanitize_file_name(identity: &str) -> String {
    identity
        .chars()
        .map(|c| match c {
            '(' | ')' | '<' | '>' | ':' | '*' | '?' | '"' | '|' | '/' | '\\' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// Deterministic artifact paths for one function identity.
///
/// A later sampled run of the same identity overwrites the same files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePaths {
    pub cpu: PathBuf,
    pub mem: PathBuf,
}

impl ProfilePaths {
    pub fn for_identity(profile_dir: &Path, identity: &str) -> Self {
        let safe = sanitize_file_name(identity);
        Self {
            cpu: profile_dir.join(format!("{}_cpu.prof", safe)),
            mem: profile_dir.join(format!("{}_mem.prof", safe)),
        }
    }
}

/// Write a heap snapshot in the legacy text heap-profile format.
///
/// Carries totals only, no stacks; enough for the renderer's summary
/// views.
pub fn write_heap_profile(path: &Path, stats: &HeapStats) -> Result<()> {
    let mut body = String::new();
    let _ = writeln!(
        body,
        "heap profile: {}: {} [{}: {}] @ heap/1",
        stats.in_use_objects, stats.in_use_bytes, stats.allocated_objects, stats.allocated_bytes
    );
    let _ = writeln!(
        body,
        "{}: {} [{}: {}] @",
        stats.in_use_objects, stats.in_use_bytes, stats.allocated_objects, stats.allocated_bytes
    );
    let _ = writeln!(body);
    let _ = writeln!(body, "# pulsetrace heap snapshot");
    let _ = writeln!(body, "# InUseBytes = {}", stats.in_use_bytes);
    let _ = writeln!(body, "# AllocatedBytes = {}", stats.allocated_bytes);
    std::fs::write(path, body)?;
    Ok(())
}

/// The profiler the tracer uses unless one is injected
pub fn default_profiler() -> Arc<dyn Profiler> {
    #[cfg(unix)]
    {
        Arc::new(PprofProfiler::default())
    }
    #[cfg(not(unix))]
    {
        Arc::new(NoopProfiler)
    }
}

// =============================================================================
// Noop Profiler
// =============================================================================

/// Profiler that captures nothing and writes no files.
///
/// Sampled calls traced with it record no profile paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProfiler;

struct NoopCapture;

impl CpuCapture for NoopCapture {
    fn finish(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

impl Profiler for NoopProfiler {
    fn start_cpu(&self, _path: &Path) -> Result<Box<dyn CpuCapture>> {
        Ok(Box::new(NoopCapture))
    }

    fn write_heap(&self, _path: &Path, _stats: &HeapStats) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Pprof Profiler
// =============================================================================

#[cfg(unix)]
pub use self::sampling_profiler::PprofProfiler;

#[cfg(unix)]
mod sampling_profiler {
    use std::path::{Path, PathBuf};

    use pprof::protos::Message;
    use tracing::debug;

    use super::write_heap_profile;
    use crate::domain::{CpuCapture, HeapStats, Profiler};
    use crate::error::{Error, Result};

    /// Signal-based sampling CPU profiler writing pprof protobuf files.
    ///
    /// Only one capture can be active per process; a second concurrent
    /// start fails and the caller skips that CPU profile.
    #[derive(Debug, Clone, Copy)]
    pub struct PprofProfiler {
        frequency: i32,
    }

    impl PprofProfiler {
        pub fn new(frequency: i32) -> Self {
            Self {
                frequency: frequency.max(1),
            }
        }
    }

    impl Default for PprofProfiler {
        fn default() -> Self {
            Self::new(1000)
        }
    }

    struct PprofCapture {
        guard: pprof::ProfilerGuard<'static>,
        path: PathBuf,
    }

    impl Profiler for PprofProfiler {
        fn start_cpu(&self, path: &Path) -> Result<Box<dyn CpuCapture>> {
            let guard = pprof::ProfilerGuardBuilder::default()
                .frequency(self.frequency)
                .blocklist(&["libc", "libgcc", "pthread", "vdso"])
                .build()
                .map_err(|e| Error::ProfileCapture(format!("failed to start CPU profile: {}", e)))?;

            Ok(Box::new(PprofCapture {
                guard,
                path: path.to_path_buf(),
            }))
        }

        fn write_heap(&self, path: &Path, stats: &HeapStats) -> Result<()> {
            write_heap_profile(path, stats)
        }
    }

    impl CpuCapture for PprofCapture {
        fn finish(self: Box<Self>) -> Result<()> {
            let report = self
                .guard
                .report()
                .build()
                .map_err(|e| Error::ProfileCapture(format!("failed to build CPU report: {}", e)))?;
            let profile = report
                .pprof()
                .map_err(|e| Error::ProfileCapture(format!("failed to encode CPU profile: {}", e)))?;

            let mut body = Vec::new();
            profile
                .encode(&mut body)
                .map_err(|e| Error::ProfileCapture(format!("failed to encode CPU profile: {}", e)))?;
            std::fs::write(&self.path, &body)?;

            debug!(path = %self.path.display(), bytes = body.len(), "Wrote CPU profile");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(
            sanitize_file_name("pkg::f(i32,String)->(bool)"),
            "pkg__f_i32,String_-__bool_"
        );
        assert_eq!(sanitize_file_name("a b|c?d*e\"f"), "a_b_c_d_e_f");
        assert_eq!(sanitize_file_name("plain_name"), "plain_name");
    }

    #[test]
    fn test_profile_paths() {
        let paths = ProfilePaths::for_identity(Path::new("/base/profiles"), "f(i32)");
        assert_eq!(paths.cpu, Path::new("/base/profiles/f_i32__cpu.prof"));
        assert_eq!(paths.mem, Path::new("/base/profiles/f_i32__mem.prof"));
    }

    #[test]
    fn test_write_heap_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heap.prof");
        let stats = HeapStats {
            in_use_bytes: 2048,
            in_use_objects: 4,
            allocated_bytes: 4096,
            allocated_objects: 9,
        };

        write_heap_profile(&path, &stats).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("heap profile: 4: 2048 [9: 4096] @ heap/1\n"));
    }

    #[test]
    fn test_noop_profiler_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpu.prof");
        let capture = NoopProfiler.start_cpu(&path).unwrap();
        capture.finish().unwrap();
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_pprof_profiler_writes_cpu_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpu.prof");

        let capture = PprofProfiler::default().start_cpu(&path).unwrap();
        let mut acc = 0u64;
        for i in 0..2_000_000u64 {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        std::hint::black_box(acc);
        capture.finish().unwrap();

        assert!(path.exists());
    }
}
