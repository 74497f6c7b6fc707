//! Runtime probes: live concurrency units and heap usage

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::HeapStats;

static ALLOCATED_BYTES: AtomicU64 = AtomicU64::new(0);
static FREED_BYTES: AtomicU64 = AtomicU64::new(0);
static ALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static FREES: AtomicU64 = AtomicU64::new(0);

/// Number of live concurrency units.
///
/// Inside a tokio runtime this is the runtime's alive task count; elsewhere
/// it falls back to the process thread count, and to 0 if neither is known.
pub fn concurrency_units() -> u64 {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        return handle.metrics().num_alive_tasks() as u64;
    }
    read_status_field("Threads:").unwrap_or(0)
}

/// Current heap statistics.
///
/// Exact when [`TrackingAllocator`] is the global allocator. Otherwise the
/// resident set size stands in for in-use bytes.
pub fn heap_stats() -> HeapStats {
    let allocations = ALLOCATIONS.load(Ordering::Relaxed);
    if allocations > 0 {
        let allocated = ALLOCATED_BYTES.load(Ordering::Relaxed);
        let freed = FREED_BYTES.load(Ordering::Relaxed);
        let frees = FREES.load(Ordering::Relaxed);
        return HeapStats {
            in_use_bytes: allocated.saturating_sub(freed),
            in_use_objects: allocations.saturating_sub(frees),
            allocated_bytes: allocated,
            allocated_objects: allocations,
        };
    }

    let rss = read_status_field("VmRSS:").map(|kb| kb * 1024).unwrap_or(0);
    HeapStats {
        in_use_bytes: rss,
        allocated_bytes: rss,
        ..Default::default()
    }
}

/// Whether allocation tracking is active in this process
pub fn tracking_enabled() -> bool {
    ALLOCATIONS.load(Ordering::Relaxed) > 0
}

/// Numeric field from `/proc/self/status` (first token after the label)
fn read_status_field(label: &str) -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix(label))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
}

/// Global allocator wrapper that counts allocations for heap profiles.
///
/// ```ignore
/// #[global_allocator]
/// static ALLOC: pulsetrace::tracer::TrackingAllocator = pulsetrace::tracer::TrackingAllocator::system();
/// ```
#[derive(Debug, Default)]
pub struct TrackingAllocator<A = System> {
    inner: A,
}

impl TrackingAllocator<System> {
    pub const fn system() -> Self {
        Self { inner: System }
    }
}

impl<A> TrackingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

fn record_alloc(size: usize) {
    ALLOCATED_BYTES.fetch_add(size as u64, Ordering::Relaxed);
    ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
}

fn record_free(size: usize) {
    FREED_BYTES.fetch_add(size as u64, Ordering::Relaxed);
    FREES.fetch_add(1, Ordering::Relaxed);
}

// SAFETY: every call forwards to the inner allocator unchanged; the wrapper
// only updates atomic counters, which never allocate.
unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc(layout);
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc_zeroed(layout);
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.inner.dealloc(ptr, layout);
        record_free(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = self.inner.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            record_free(layout.size());
            record_alloc(new_size);
        }
        new_ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_units_outside_runtime() {
        // Thread count on Linux; 0 where /proc is unavailable
        let units = concurrency_units();
        if std::path::Path::new("/proc/self/status").exists() {
            assert!(units >= 1);
        }
    }

    #[tokio::test]
    async fn test_concurrency_units_counts_tasks() {
        let before = concurrency_units();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = rx.await;
        });

        assert!(concurrency_units() > before);

        tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[test]
    fn test_heap_stats_fall_back_to_rss() {
        // This test binary keeps the system allocator
        assert!(!tracking_enabled());
        let stats = heap_stats();
        assert_eq!(stats.in_use_objects, 0);
        assert_eq!(stats.allocated_objects, 0);
        assert_eq!(stats.in_use_bytes, stats.allocated_bytes);
    }
}
