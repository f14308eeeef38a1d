//! Restarting the post loop with capped exponential backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::{Error, ErrorPoster, Tunables};

// Upper bound (exclusive) of the random jitter added on every raise.
const MAX_JITTER_MS: u64 = 500;

/// Doubles `backoff` and adds jitter, so that many processes failing at
/// once do not retry in lock-step.
pub(crate) fn raise_backoff(backoff: Duration) -> Duration {
    let jitter = Duration::from_millis(rand::rng().random_range(0..MAX_JITTER_MS));
    backoff.saturating_mul(2).saturating_add(jitter)
}

/// The restart delay, owned by a single supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration) -> Self {
        Backoff { current: floor }
    }

    /// Returns the delay before the next restart, given how long the run
    /// that just ended lasted, and grows the backoff for the one after.
    ///
    /// A healthy run resets the backoff to its floor first.  The returned
    /// delay never exceeds the configured maximum.
    pub fn next_delay(&mut self, lasted: Duration, tunables: &Tunables) -> Duration {
        if lasted >= tunables.reset_failure_backoff_after() {
            self.current = tunables.reset_failure_backoff_to();
        }
        let delay = self.current.min(tunables.max_failure_backoff());
        self.current = raise_backoff(delay);
        delay
    }
}

/// Runs `run` again and again until `cancel` fires.
///
/// Every exit of a run is reported to `poster`, wrapped with how long the
/// run lasted and how long the supervisor sleeps before the restart.
/// Cancellation is reported exactly once, after which nothing else is.
pub(crate) async fn retry_post_loop<F, Fut>(
    cancel: CancellationToken,
    tunables: Arc<Tunables>,
    poster: Arc<dyn ErrorPoster>,
    mut run: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Error>,
{
    let mut backoff = Backoff::new(tunables.reset_failure_backoff_to());
    loop {
        if cancel.is_cancelled() {
            poster.post(&Error::Cancelled);
            return;
        }

        let started = Instant::now();
        let cause = run().await;
        let lasted = started.elapsed();
        hmetrics_debug!("post loop exited after {:?}: {}", lasted, cause);

        let exited = Error::LoopExited {
            lasted,
            source: Box::new(cause),
        };
        let delay = backoff.next_delay(lasted, &tunables);

        if cancel.is_cancelled() {
            poster.post(&Error::Shutdown {
                source: Box::new(exited),
            });
            return;
        }

        poster.post(&Error::BackingOff {
            delay,
            source: Box::new(exited),
        });

        // the sleep is dropped on either branch, so no timer outlives us
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                poster.post(&Error::CancelledInBackoff);
                return;
            }
            _ = time::sleep(delay) => {}
        }
    }
}
