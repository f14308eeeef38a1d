/// Internal diagnostics, routed to the `log` facade under the `hmetrics`
/// target.
///
/// Nothing here is user-visible by default; anything the application must
/// hear about goes through its `ErrorPoster` instead.
macro_rules! hmetrics_debug {
    ($($arg:tt)*) => {
        ::log::debug!(target: "hmetrics", $($arg)*)
    };
}

/// Reads a `Duration` knob stored as nanoseconds in an `AtomicU64`.
macro_rules! load_duration {
    ($atomic:expr) => {
        ::std::time::Duration::from_nanos($atomic.load(::std::sync::atomic::Ordering::SeqCst))
    };
}
