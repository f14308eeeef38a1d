use std::time::Duration;

use thiserror::Error;

use crate::redact::RedactError;

/// The endpoint answered a metrics post with an unexpected status.
///
/// `url` is always the redacted form of the endpoint, so this error is
/// safe to log.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("http: got {actual} instead of {expected} from: {url:?} ({comment})")]
pub struct HttpFailureError {
    /// The status code which counts as success.
    pub expected: u16,
    /// The status code the endpoint answered with.
    pub actual: u16,
    /// The redacted endpoint.
    pub url: String,
    /// Free-form context.
    pub comment: String,
}

/// Every error `hmetrics` reports, either from
/// [`SpawnOptions::spawn`](crate::SpawnOptions::spawn) or through the
/// [`ErrorPoster`](crate::ErrorPoster).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Spawning was attempted without an error poster.
    #[error("hmetrics: given no error poster")]
    MissingPoster,
    /// The environment variable holding the endpoint is not valid unicode.
    #[error("hmetrics: endpoint in '{0}' is not valid unicode")]
    NotUnicode(String),
    /// The endpoint could not be parsed as a URL.
    #[error("hmetrics: could not parse endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The endpoint URL has a scheme other than `http` or `https`.
    #[error("hmetrics: invalid URL scheme {0:?}")]
    InvalidScheme(String),
    /// The endpoint URL could not be redacted for logging.
    #[error("hmetrics: endpoint URL is badly malformed: {0}")]
    Malformed(#[from] RedactError),
    /// The worker thread could not be started.
    #[error("hmetrics: could not start the export thread: {0}")]
    Spawn(#[source] std::io::Error),
    /// The worker thread could not build its async runtime.
    #[error("hmetrics: could not build the export runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// The HTTP client for a post loop run could not be built.
    #[error("hmetrics: could not build the http client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// The endpoint answered with a non-success status.
    #[error(transparent)]
    HttpStatus(#[from] HttpFailureError),
    /// The metrics post failed below HTTP (DNS, connect, timeout, ...).
    #[error("hmetrics: posting metrics failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The runtime statistics could not be read.
    #[error("hmetrics: reading runtime statistics failed: {0}")]
    Collect(#[source] std::io::Error),
    /// The metrics document could not be encoded.
    #[error("hmetrics: encoding metrics failed: {0}")]
    Encode(#[from] serde_json::Error),
    /// The export was cancelled through its handle.
    #[error("context cancelled")]
    Cancelled,
    /// A post loop run ended.
    #[error("hmetrics post loop lasted {:.2}ms: {source}", .lasted.as_secs_f64() * 1000.0)]
    LoopExited {
        /// How long the run lived.
        lasted: Duration,
        /// Why the run ended.
        source: Box<Error>,
    },
    /// The post loop will be restarted after a delay.
    #[error("{source}: sleeping {:.2}s", .delay.as_secs_f64())]
    BackingOff {
        /// The delay before the restart.
        delay: Duration,
        /// Why the previous run ended.
        source: Box<Error>,
    },
    /// The post loop ended and the export was cancelled; nothing restarts.
    #[error("{source}: hmetrics retry loop exiting too, context cancelled")]
    Shutdown {
        /// Why the last run ended.
        source: Box<Error>,
    },
    /// The export was cancelled while waiting to restart the post loop.
    #[error("hmetrics: context cancelled while in delay backoff, exiting")]
    CancelledInBackoff,
}

impl Error {
    /// Returns `true` if this error reports cancellation of the export.
    ///
    /// Cancellation is terminal: after such an error is posted, no further
    /// errors are.  Wrapped errors are inspected too.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Error::Cancelled | Error::CancelledInBackoff | Error::Shutdown { .. } => true,
            Error::LoopExited { source, .. } | Error::BackingOff { source, .. } => {
                source.is_cancellation()
            }
            _ => false,
        }
    }
}
