//! Heap accounting with the tracking allocator installed process-wide.
//!
//! Lives in its own test binary so the allocator counters never leak into
//! tests that expect the RSS fallback.

use pulsetrace::tracer::{heap_stats, tracking_enabled, TrackingAllocator};

#[global_allocator]
static ALLOC: TrackingAllocator = TrackingAllocator::system();

#[test]
fn test_tracking_allocator_counts() {
    let before = heap_stats();
    assert!(tracking_enabled());

    let buffer: Vec<u8> = Vec::with_capacity(64 * 1024);
    let during = heap_stats();
    assert!(during.allocated_bytes >= before.allocated_bytes + 64 * 1024);
    assert!(during.allocated_objects > before.allocated_objects);
    assert!(during.allocated_bytes >= during.in_use_bytes);
    drop(buffer);

    let after = heap_stats();
    assert!(after.in_use_bytes <= after.allocated_bytes);
    assert!(after.allocated_objects >= after.in_use_objects);
}
