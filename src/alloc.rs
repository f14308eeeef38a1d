//! An opt-in allocator wrapper feeding the heap gauges.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

static MALLOCS: AtomicU64 = AtomicU64::new(0);
static FREES: AtomicU64 = AtomicU64::new(0);
static LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);

/// Counts allocations on top of the system allocator.
///
/// Install it as the global allocator to have [`ProcessStats`] report the
/// bytes and number of live heap objects.  Without it the heap gauge falls
/// back to the resident set size and the object gauge stays at zero.
///
/// ```
/// #[global_allocator]
/// static ALLOC: hmetrics::TrackingAllocator = hmetrics::TrackingAllocator;
/// # fn main() {}
/// ```
///
/// [`ProcessStats`]: crate::ProcessStats
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackingAllocator;

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        record_free(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            // same object, different size
            LIVE_BYTES.fetch_sub(layout.size(), Ordering::Relaxed);
            LIVE_BYTES.fetch_add(new_size, Ordering::Relaxed);
        }
        new_ptr
    }
}

fn record_alloc(size: usize) {
    MALLOCS.fetch_add(1, Ordering::Relaxed);
    LIVE_BYTES.fetch_add(size, Ordering::Relaxed);
}

fn record_free(size: usize) {
    FREES.fetch_add(1, Ordering::Relaxed);
    LIVE_BYTES.fetch_sub(size, Ordering::Relaxed);
}

/// Cumulative counts recorded by the [`TrackingAllocator`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AllocCounts {
    pub mallocs: u64,
    pub frees: u64,
    pub live_bytes: u64,
}

impl AllocCounts {
    /// Reads the counters; all zero unless the allocator is installed.
    pub fn read() -> Self {
        AllocCounts {
            mallocs: MALLOCS.load(Ordering::Relaxed),
            frees: FREES.load(Ordering::Relaxed),
            live_bytes: LIVE_BYTES.load(Ordering::Relaxed) as u64,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.mallocs > 0
    }
}
