//! The live-tunable timing knobs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::constants::USER_AGENT;

/// Default ceiling for the delay between restarts of the post loop.
pub const DEFAULT_MAX_FAILURE_BACKOFF: Duration = Duration::from_secs(10 * 60);
/// Default lifetime after which a post loop run counts as healthy.
pub const DEFAULT_RESET_FAILURE_BACKOFF_AFTER: Duration = Duration::from_secs(5 * 60);
/// Default floor the backoff is reset to after a healthy run.
pub const DEFAULT_RESET_FAILURE_BACKOFF_TO: Duration = Duration::from_secs(1);
/// Default interval between metrics posts.
///
/// This is the interval the receiving service is designed around.
pub const DEFAULT_METRICS_POST_INTERVAL: Duration = Duration::from_secs(20);
/// Default timeout of a single metrics post.
///
/// Kept strictly below the post interval.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

// The HTTP timeout must leave at least this much of each interval unused.
const POST_SAFETY_MARGIN: Duration = Duration::from_secs(1);
// Floor of the clamped timeout for degenerate intervals.
const MIN_POST_DURATION: Duration = Duration::from_nanos(1);

lazy_static::lazy_static! {
    static ref GLOBAL: Arc<Tunables> = Arc::new(Tunables::new());
}

/// The set of timing knobs governing metrics export.
///
/// Every knob is independently atomic: it may be read or replaced at any
/// time from any thread, and readers see the new value on their next read.
/// There is no consistency across knobs read one after another.
///
/// Each setter is also a getter: passing a zero duration (or an empty
/// user agent) leaves the knob untouched.  Setters always return the value
/// in effect before the call.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use hmetrics::Tunables;
///
/// let tunables = Tunables::new();
/// let previous = tunables.set_http_timeout(Duration::from_secs(5));
/// assert_eq!(previous, Duration::from_secs(10));
/// assert_eq!(tunables.set_http_timeout(Duration::ZERO), Duration::from_secs(5));
/// ```
pub struct Tunables {
    max_failure_backoff: AtomicU64,
    reset_failure_backoff_after: AtomicU64,
    reset_failure_backoff_to: AtomicU64,
    metrics_post_interval: AtomicU64,
    http_timeout: AtomicU64,
    http_user_agent: ArcSwap<String>,
}

fn to_nanos(value: Duration) -> u64 {
    u64::try_from(value.as_nanos()).unwrap_or(u64::MAX)
}

fn swap_duration(atomic: &AtomicU64, value: Duration) -> Duration {
    if value.is_zero() {
        return load_duration!(atomic);
    }
    Duration::from_nanos(atomic.swap(to_nanos(value), Ordering::SeqCst))
}

impl Default for Tunables {
    fn default() -> Self {
        Self::new()
    }
}

impl Tunables {
    /// Creates a registry holding the default values.
    pub fn new() -> Self {
        Tunables {
            max_failure_backoff: AtomicU64::new(to_nanos(DEFAULT_MAX_FAILURE_BACKOFF)),
            reset_failure_backoff_after: AtomicU64::new(to_nanos(
                DEFAULT_RESET_FAILURE_BACKOFF_AFTER,
            )),
            reset_failure_backoff_to: AtomicU64::new(to_nanos(DEFAULT_RESET_FAILURE_BACKOFF_TO)),
            metrics_post_interval: AtomicU64::new(to_nanos(DEFAULT_METRICS_POST_INTERVAL)),
            http_timeout: AtomicU64::new(to_nanos(DEFAULT_HTTP_TIMEOUT)),
            http_user_agent: ArcSwap::from_pointee(USER_AGENT.clone()),
        }
    }

    /// Returns the process-wide registry.
    ///
    /// This is the registry used by [`spawn`](crate::spawn) and by
    /// [`SpawnOptions`](crate::SpawnOptions) unless told otherwise.
    pub fn global() -> Arc<Tunables> {
        GLOBAL.clone()
    }

    /// Sets the maximum delay between restarts of the post loop.
    pub fn set_max_failure_backoff(&self, backoff: Duration) -> Duration {
        swap_duration(&self.max_failure_backoff, backoff)
    }
    /// The maximum delay between restarts of the post loop.
    pub fn max_failure_backoff(&self) -> Duration {
        load_duration!(self.max_failure_backoff)
    }

    /// Sets how long a post loop run must last to reset the backoff.
    ///
    /// A run living at least this long is considered healthy, and the next
    /// restart delay goes back to
    /// [`reset_failure_backoff_to`](Self::reset_failure_backoff_to).
    pub fn set_reset_failure_backoff_after(&self, all_clear: Duration) -> Duration {
        swap_duration(&self.reset_failure_backoff_after, all_clear)
    }
    /// How long a post loop run must last to reset the backoff.
    pub fn reset_failure_backoff_after(&self) -> Duration {
        load_duration!(self.reset_failure_backoff_after)
    }

    /// Sets the floor of the restart backoff.
    pub fn set_reset_failure_backoff_to(&self, floor: Duration) -> Duration {
        swap_duration(&self.reset_failure_backoff_to, floor)
    }
    /// The floor of the restart backoff.
    pub fn reset_failure_backoff_to(&self) -> Duration {
        load_duration!(self.reset_failure_backoff_to)
    }

    /// Sets how often metrics are posted.
    ///
    /// The interval is read once when a post loop run starts, so a change
    /// only applies to the next run.
    ///
    /// Do not change this without guidance from the operator of the
    /// receiving service: their systems expect the default interval.
    pub fn set_metrics_post_interval(&self, interval: Duration) -> Duration {
        swap_duration(&self.metrics_post_interval, interval)
    }
    /// How often metrics are posted.
    pub fn metrics_post_interval(&self) -> Duration {
        load_duration!(self.metrics_post_interval)
    }

    /// Sets the timeout of a single metrics post.
    ///
    /// The post loop clamps this below the post interval on every tick.
    pub fn set_http_timeout(&self, limit: Duration) -> Duration {
        swap_duration(&self.http_timeout, limit)
    }
    /// The timeout of a single metrics post.
    pub fn http_timeout(&self) -> Duration {
        load_duration!(self.http_timeout)
    }

    /// Sets the `User-Agent` header of metrics posts.
    pub fn set_http_user_agent(&self, user_agent: &str) -> Arc<String> {
        if user_agent.is_empty() {
            return self.http_user_agent();
        }
        self.http_user_agent.swap(Arc::new(user_agent.to_string()))
    }
    /// The `User-Agent` header of metrics posts.
    pub fn http_user_agent(&self) -> Arc<String> {
        self.http_user_agent.load_full()
    }

    /// Returns the HTTP timeout to use for a post loop ticking at `interval`.
    ///
    /// A configured timeout that would not finish before the next tick is
    /// clamped and the clamped value is stored back.
    pub(crate) fn effective_http_timeout(&self, interval: Duration) -> Duration {
        let ceiling = max_sane_post_duration(interval);
        let current = self.http_timeout();
        if current <= ceiling {
            return current;
        }
        hmetrics_debug!(
            "clamping http timeout from {:?} to {:?} for interval {:?}",
            current,
            ceiling,
            interval
        );
        self.set_http_timeout(ceiling);
        ceiling
    }
}

/// The longest a post may take and still finish before the next tick.
///
/// Never zero, since a zero timeout cannot be stored.
pub(crate) fn max_sane_post_duration(interval: Duration) -> Duration {
    match interval.checked_sub(POST_SAFETY_MARGIN) {
        Some(ceiling) if !ceiling.is_zero() => ceiling,
        _ => (interval / 2).max(MIN_POST_DURATION),
    }
}

impl fmt::Debug for Tunables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tunables")
            .field("max_failure_backoff", &self.max_failure_backoff())
            .field(
                "reset_failure_backoff_after",
                &self.reset_failure_backoff_after(),
            )
            .field("reset_failure_backoff_to", &self.reset_failure_backoff_to())
            .field("metrics_post_interval", &self.metrics_post_interval())
            .field("http_timeout", &self.http_timeout())
            .field("http_user_agent", &self.http_user_agent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let t = Tunables::new();
        assert_eq!(t.max_failure_backoff(), Duration::from_secs(600));
        assert_eq!(t.reset_failure_backoff_after(), Duration::from_secs(300));
        assert_eq!(t.reset_failure_backoff_to(), Duration::from_secs(1));
        assert_eq!(t.metrics_post_interval(), Duration::from_secs(20));
        assert_eq!(t.http_timeout(), Duration::from_secs(10));
        assert!(t.http_user_agent().starts_with("hmetrics/"));
        assert!(t.http_timeout() < t.metrics_post_interval());
    }

    #[test]
    fn test_zero_reads_without_modifying() {
        let t = Tunables::new();
        assert_eq!(
            t.set_max_failure_backoff(Duration::ZERO),
            DEFAULT_MAX_FAILURE_BACKOFF
        );
        assert_eq!(t.max_failure_backoff(), DEFAULT_MAX_FAILURE_BACKOFF);
        assert_eq!(&*t.set_http_user_agent(""), USER_AGENT.as_str());
        assert_eq!(&*t.http_user_agent(), USER_AGENT.as_str());
    }

    #[test]
    fn test_setters_return_previous() {
        let t = Tunables::new();
        assert_eq!(
            t.set_metrics_post_interval(Duration::from_secs(5)),
            DEFAULT_METRICS_POST_INTERVAL
        );
        assert_eq!(
            t.set_metrics_post_interval(Duration::from_secs(7)),
            Duration::from_secs(5)
        );
        assert_eq!(&*t.set_http_user_agent("custom/1.0"), USER_AGENT.as_str());
        assert_eq!(&*t.set_http_user_agent("custom/2.0"), "custom/1.0");
    }

    #[test]
    fn test_clamp_never_reaches_zero() {
        let t = Tunables::new();
        for nanos in [1, 2, 3] {
            let interval = Duration::from_nanos(nanos);
            let ceiling = max_sane_post_duration(interval);
            assert!(!ceiling.is_zero());
            assert_eq!(t.effective_http_timeout(interval), ceiling);
            assert_eq!(t.http_timeout(), ceiling);
        }
        assert_eq!(
            max_sane_post_duration(Duration::ZERO),
            Duration::from_nanos(1)
        );
    }

    #[test]
    fn test_user_agent_reads_while_swapping() {
        let t = Arc::new(Tunables::new());
        let writer = {
            let t = t.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    t.set_http_user_agent(&format!("writer/{}", i));
                }
            })
        };
        for _ in 0..1000 {
            let agent = t.http_user_agent();
            assert!(agent.starts_with("writer/") || agent.starts_with("hmetrics/"));
        }
        writer.join().unwrap();
        assert_eq!(t.http_user_agent().as_str(), "writer/999");
    }

    #[test]
    fn test_global_is_shared() {
        assert!(Arc::ptr_eq(&Tunables::global(), &Tunables::global()));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = Tunables::new();
        let b = Tunables::new();
        a.set_reset_failure_backoff_to(Duration::from_millis(10));
        assert_eq!(b.reset_failure_backoff_to(), DEFAULT_RESET_FAILURE_BACKOFF_TO);
    }

    #[test]
    fn test_concurrent_access() {
        let t = Arc::new(Tunables::new());
        let handles: Vec<_> = (1..=8u64)
            .map(|i| {
                let t = t.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        t.set_http_timeout(Duration::from_millis(i));
                        let _ = t.http_timeout();
                        t.set_http_user_agent(&format!("agent/{}", i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let timeout = t.http_timeout();
        assert!(timeout >= Duration::from_millis(1) && timeout <= Duration::from_millis(8));
        assert!(t.http_user_agent().starts_with("agent/"));
    }

    #[test]
    fn test_effective_http_timeout() {
        let t = Tunables::new();
        let interval = Duration::from_secs(5);
        assert_eq!(t.effective_http_timeout(interval), Duration::from_secs(4));
        assert_eq!(t.http_timeout(), Duration::from_secs(4));

        t.set_http_timeout(Duration::from_secs(2));
        assert_eq!(t.effective_http_timeout(interval), Duration::from_secs(2));
        assert_eq!(t.http_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_clamp_for_short_intervals() {
        let t = Tunables::new();
        let interval = Duration::from_millis(400);
        assert_eq!(t.effective_http_timeout(interval), Duration::from_millis(200));
        assert_eq!(
            max_sane_post_duration(Duration::from_secs(1)),
            Duration::from_millis(500)
        );
    }
}
