use crate::Error;

/// Receives every loggable event of a running export.
///
/// Collection failures, post failures, restart notices and the final
/// cancellation notice all arrive here.  The poster cannot influence the
/// export: there is nothing to return and no way to cancel from here.
///
/// Any `Fn(&Error)` closure is a poster:
///
/// ```
/// let poster = |err: &hmetrics::Error| eprintln!("hmetrics error: {}", err);
/// # let _: &dyn hmetrics::ErrorPoster = &poster;
/// ```
pub trait ErrorPoster: Send + Sync + 'static {
    /// Logs an error.
    fn post(&self, error: &Error);
}

impl<F> ErrorPoster for F
where
    F: Fn(&Error) + Send + Sync + 'static,
{
    fn post(&self, error: &Error) {
        self(error)
    }
}
