//! This crate posts memory and scheduling statistics of the running process
//! to a Heroku-style language metrics endpoint.
//!
//! Once started, a background thread collects a small fixed set of counters
//! and gauges every post interval (20 seconds by default) and posts them as
//! JSON.  Failed posts never stop the export: they are handed to an error
//! poster supplied by the application, and if the post loop itself ends it
//! is restarted with capped exponential backoff until the export is
//! cancelled.
//!
//! # Quickstart
//!
//! The endpoint is taken from the `HEROKU_METRICS_URL` environment
//! variable.  When it is not set nothing is started, so the same binary
//! can run with and without metrics:
//!
//! ```
//! let spawned = hmetrics::spawn(|err: &hmetrics::Error| {
//!     eprintln!("metrics: {}", err);
//! })
//! .expect("bad metrics configuration");
//! println!("{}", spawned.message);
//!
//! if let Some(handle) = spawned.handle {
//!     // on shutdown
//!     handle.cancel_and_join();
//! }
//! ```
//!
//! # Tuning
//!
//! All timing lives in a [`Tunables`] registry which may be changed at any
//! time from any thread.  Exports use [`Tunables::global`] unless given a
//! registry of their own through [`SpawnOptions::tunables`].
//!
//! # Logging
//!
//! Everything the application should know about arrives at its
//! [`ErrorPoster`].  Additional diagnostics go to the [`log`] facade under
//! the `hmetrics` target at debug level.
//!
//! # Features
//!
//! * `native-tls` (default): posts over TLS using the platform's TLS stack.
//! * `rustls`: posts over TLS using rustls.
//!
//! [`log`]: https://docs.rs/log
#![warn(missing_docs)]

#[macro_use]
mod macros;

mod alloc;
mod collect;
mod constants;
mod error;
mod post_loop;
mod poster;
mod redact;
mod retry;
mod spawn;
mod submit;
mod tunables;

pub use crate::alloc::TrackingAllocator;
pub use crate::collect::{gather_metrics, Baseline, MemStats, ProcessStats, RuntimeStats};
pub use crate::constants::{ENV_KEY_ENDPOINT, PACKAGE_HTTP_VERSION, USER_AGENT, VERSION};
pub use crate::error::{Error, HttpFailureError};
pub use crate::poster::ErrorPoster;
pub use crate::redact::{redact_url, RedactError, REDACTED, REDACTED_UUID_FORM};
pub use crate::spawn::{spawn, ExportHandle, SpawnOptions, Spawned};
pub use crate::tunables::{
    Tunables, DEFAULT_HTTP_TIMEOUT, DEFAULT_MAX_FAILURE_BACKOFF, DEFAULT_METRICS_POST_INTERVAL,
    DEFAULT_RESET_FAILURE_BACKOFF_AFTER, DEFAULT_RESET_FAILURE_BACKOFF_TO,
};
