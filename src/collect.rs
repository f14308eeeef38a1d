//! Gathering runtime statistics into the posted metrics document.

use std::collections::BTreeMap;
use std::io;

use serde::Serialize;

use crate::alloc::AllocCounts;
use crate::constants::{
    COUNTER_GC_COLLECTIONS, COUNTER_GC_PAUSE_NS, GAUGE_GC_GOAL, GAUGE_HEAP_BYTES,
    GAUGE_HEAP_OBJECTS, GAUGE_ROUTINES, GAUGE_STACK_BYTES,
};
use crate::Error;

/// One raw reading of the runtime statistics.
///
/// `num_gc` and `pause_total_ns` are cumulative since process start; the
/// collector turns them into deltas.  Everything else is a point-in-time
/// value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemStats {
    /// Completed garbage collection cycles.
    pub num_gc: u32,
    /// Total time spent in collection pauses, in nanoseconds.
    pub pause_total_ns: u64,
    /// Bytes of allocated heap objects.
    pub heap_alloc: u64,
    /// Bytes in use by stacks.
    pub stack_inuse: u64,
    /// Cumulative count of heap allocations.
    pub mallocs: u64,
    /// Cumulative count of heap frees.
    pub frees: u64,
    /// Heap size the next collection cycle aims for.
    pub next_gc: u64,
    /// Concurrently schedulable units of work.
    pub tasks: u64,
}

/// A source of runtime statistics.
///
/// A failed reading is reported to the error poster and the tick is
/// skipped; the next tick reads again.
///
/// Implement this to report statistics of a runtime the default
/// [`ProcessStats`] knows nothing about, e.g. an embedded interpreter with
/// its own collector.
///
/// # Example
///
/// ```rust
/// use std::io;
/// use hmetrics::{MemStats, RuntimeStats};
///
/// struct PoolStats;
///
/// impl RuntimeStats for PoolStats {
///     fn read(&self) -> io::Result<MemStats> {
///         Ok(MemStats {
///             tasks: 4,
///             ..Default::default()
///         })
///     }
/// }
/// ```
pub trait RuntimeStats: Send + Sync + 'static {
    /// Takes a reading.  Called once per tick; should be fast.
    fn read(&self) -> io::Result<MemStats>;
}

/// Statistics of the current process.
///
/// * heap bytes and live objects come from the [`TrackingAllocator`] when
///   it is installed; otherwise heap bytes are the resident set size.
/// * stack bytes are the main thread's stack (`VmStk`).
/// * schedulable units are the OS threads of the process.
/// * a Rust process has no collector, so the GC fields stay zero.
///
/// Values a platform cannot provide are reported as zero.
///
/// [`TrackingAllocator`]: crate::TrackingAllocator
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessStats {
    _private: (),
}

impl ProcessStats {
    /// Creates a new process statistics source.
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl RuntimeStats for ProcessStats {
    fn read(&self) -> io::Result<MemStats> {
        let alloc = AllocCounts::read();
        let heap_alloc = if alloc.is_tracking() {
            alloc.live_bytes
        } else {
            get_rss_bytes().unwrap_or(0)
        };
        Ok(MemStats {
            num_gc: 0,
            pause_total_ns: 0,
            heap_alloc,
            stack_inuse: get_stack_bytes().unwrap_or(0),
            mallocs: alloc.mallocs,
            frees: alloc.frees,
            next_gc: 0,
            tasks: get_thread_count().unwrap_or(0),
        })
    }
}

/// Gets the RSS (Resident Set Size) in bytes.
#[cfg(target_os = "linux")]
fn get_rss_bytes() -> Option<u64> {
    // Format: size resident shared text lib data dt, in pages
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(page_size)
        .ok()
        .map(|page_size| resident_pages * page_size)
}

/// Gets the RSS (Resident Set Size) in bytes.
#[cfg(target_os = "macos")]
fn get_rss_bytes() -> Option<u64> {
    unsafe {
        let mut info: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut info) == 0 {
            // On macOS, ru_maxrss is in bytes
            u64::try_from(info.ru_maxrss).ok()
        } else {
            None
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn get_rss_bytes() -> Option<u64> {
    None
}

/// Gets the stack size of the main thread in bytes.
#[cfg(target_os = "linux")]
fn get_stack_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|line| line.starts_with("VmStk:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

#[cfg(not(target_os = "linux"))]
fn get_stack_bytes() -> Option<u64> {
    None
}

/// Gets the number of threads in the current process.
#[cfg(target_os = "linux")]
fn get_thread_count() -> Option<u64> {
    let entries = std::fs::read_dir("/proc/self/task").ok()?;
    Some(entries.count() as u64)
}

#[cfg(not(target_os = "linux"))]
fn get_thread_count() -> Option<u64> {
    None
}

/// The cumulative values the previous collection saw.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Baseline {
    /// Cumulative pause time at the previous collection.
    pub pause_total_ns: u64,
    /// Cumulative collection count at the previous collection.
    pub num_gc: u32,
}

/// The posted document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct Snapshot {
    pub counters: BTreeMap<&'static str, f64>,
    pub gauges: BTreeMap<&'static str, f64>,
}

impl Snapshot {
    fn new(stats: &MemStats, prev: Baseline) -> Self {
        let mut counters = BTreeMap::new();
        counters.insert(
            COUNTER_GC_COLLECTIONS,
            f64::from(stats.num_gc.wrapping_sub(prev.num_gc)),
        );
        counters.insert(
            COUNTER_GC_PAUSE_NS,
            stats.pause_total_ns.wrapping_sub(prev.pause_total_ns) as f64,
        );

        let mut gauges = BTreeMap::new();
        gauges.insert(GAUGE_HEAP_BYTES, stats.heap_alloc as f64);
        gauges.insert(GAUGE_STACK_BYTES, stats.stack_inuse as f64);
        // live objects
        gauges.insert(
            GAUGE_HEAP_OBJECTS,
            stats.mallocs.saturating_sub(stats.frees) as f64,
        );
        gauges.insert(GAUGE_GC_GOAL, stats.next_gc as f64);
        gauges.insert(GAUGE_ROUTINES, stats.tasks as f64);

        Snapshot { counters, gauges }
    }
}

/// Reads `stats` and encodes the metrics document.
///
/// Counters are reported as the change since `prev`.  On success returns
/// the encoded document and the baseline for the next call; on failure
/// the caller keeps its old baseline.
pub fn gather_metrics(
    stats: &dyn RuntimeStats,
    prev: Baseline,
) -> Result<(Vec<u8>, Baseline), Error> {
    let reading = stats.read().map_err(Error::Collect)?;
    let body = serde_json::to_vec(&Snapshot::new(&reading, prev))?;
    let next = Baseline {
        pause_total_ns: reading.pause_total_ns,
        num_gc: reading.num_gc,
    };
    Ok((body, next))
}
