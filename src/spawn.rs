//! Validating the configuration and starting the export thread.

use std::borrow::Cow;
use std::env::{self, VarError};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use reqwest::Client as ReqwestClient;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::constants::ENV_KEY_ENDPOINT;
use crate::post_loop::PostLoop;
use crate::redact::redact_url;
use crate::retry::retry_post_loop;
use crate::{Error, ErrorPoster, ProcessStats, RuntimeStats, Tunables};

const THREAD_NAME: &str = "hmetrics-exporter";

/// Configures and starts a metrics export.
///
/// Only the error poster is required.  Everything else has a default:
///
/// * the endpoint is read from the `HEROKU_METRICS_URL` environment variable
/// * timing comes from [`Tunables::global`]
/// * statistics come from [`ProcessStats`]
/// * a fresh HTTP client is built for every run of the post loop
///
/// # Examples
///
/// ```
/// use hmetrics::SpawnOptions;
///
/// let spawned = SpawnOptions::new()
///     .poster(|err: &hmetrics::Error| eprintln!("{}", err))
///     .env_key("MY_APP_METRICS_URL_THAT_IS_NOT_SET")
///     .spawn()
///     .unwrap();
/// assert!(spawned.handle.is_none());
/// ```
#[derive(Clone)]
pub struct SpawnOptions {
    poster: Option<Arc<dyn ErrorPoster>>,
    tunables: Arc<Tunables>,
    env_key: Cow<'static, str>,
    endpoint: Option<String>,
    http_client: Option<ReqwestClient>,
    runtime_stats: Arc<dyn RuntimeStats>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        SpawnOptions {
            poster: None,
            tunables: Tunables::global(),
            env_key: Cow::Borrowed(ENV_KEY_ENDPOINT),
            endpoint: None,
            http_client: None,
            runtime_stats: Arc::new(ProcessStats::new()),
        }
    }
}

impl fmt::Debug for SpawnOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnOptions")
            .field("poster", &self.poster.as_ref().map(|_| ".."))
            .field("tunables", &self.tunables)
            .field("env_key", &self.env_key)
            .field("endpoint", &self.endpoint.as_ref().map(|_| "[hidden]"))
            .field("http_client", &self.http_client)
            .finish()
    }
}

impl SpawnOptions {
    /// Creates options holding the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the receiver of every error of the export.
    pub fn poster<P: ErrorPoster>(mut self, poster: P) -> Self {
        self.poster = Some(Arc::new(poster));
        self
    }

    /// Sets the registry the export reads its timing from.
    pub fn tunables(mut self, tunables: Arc<Tunables>) -> Self {
        self.tunables = tunables;
        self
    }

    /// Sets the environment variable holding the endpoint.
    pub fn env_key<K: Into<Cow<'static, str>>>(mut self, key: K) -> Self {
        self.env_key = key.into();
        self
    }

    /// Uses `endpoint` instead of reading it from the environment.
    pub fn endpoint<E: Into<String>>(mut self, endpoint: E) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Posts with `client` instead of building one per run.
    pub fn http_client(mut self, client: ReqwestClient) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Reads statistics from `stats` instead of [`ProcessStats`].
    pub fn runtime_stats<S: RuntimeStats>(mut self, stats: S) -> Self {
        self.runtime_stats = Arc::new(stats);
        self
    }

    /// Validates the configuration and starts the export.
    ///
    /// Returns an error, without starting anything, if no poster was set,
    /// the environment variable is not valid unicode, or the endpoint is
    /// not a well-formed `http` or `https` URL.  A missing or
    /// empty endpoint is not an error: the export is simply not started,
    /// and the returned [`Spawned`] says so and has no handle.
    pub fn spawn(self) -> Result<Spawned, Error> {
        let poster = self.poster.ok_or(Error::MissingPoster)?;

        let raw = match self.endpoint {
            Some(endpoint) if endpoint.is_empty() => {
                return Ok(Spawned::not_started(
                    "hmetrics: not starting stats export, the configured endpoint is empty".into(),
                ))
            }
            Some(endpoint) => endpoint,
            None => match env::var(&*self.env_key) {
                Ok(value) if value.is_empty() => {
                    return Ok(Spawned::not_started(format!(
                        "hmetrics: not starting stats export, '{}' is empty",
                        self.env_key
                    )))
                }
                Ok(value) => value,
                Err(VarError::NotPresent) => {
                    return Ok(Spawned::not_started(format!(
                        "hmetrics: not starting stats export, '{}' not found in environ",
                        self.env_key
                    )))
                }
                Err(VarError::NotUnicode(_)) => {
                    return Err(Error::NotUnicode(self.env_key.into_owned()))
                }
            },
        };

        let endpoint = Url::parse(&raw)?;
        match endpoint.scheme() {
            "http" | "https" => {}
            other => return Err(Error::InvalidScheme(other.to_string())),
        }
        let redacted = redact_url(&endpoint)?;

        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let tunables = self.tunables;
        let post_loop = PostLoop {
            endpoint,
            tunables: tunables.clone(),
            poster: poster.clone(),
            stats: self.runtime_stats,
            client: self.http_client,
        };

        let thread = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || {
                // the export gets a runtime of its own, whatever the host uses
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        poster.post(&Error::Runtime(err));
                        return;
                    }
                };
                rt.block_on(retry_post_loop(
                    worker_cancel.clone(),
                    tunables,
                    poster,
                    || post_loop.run(&worker_cancel),
                ));
                hmetrics_debug!("export thread exiting");
            })
            .map_err(Error::Spawn)?;

        hmetrics_debug!("started stats export to {}", redacted);
        Ok(Spawned {
            message: format!("hmetrics: started stats export to {:?}", redacted.as_str()),
            handle: Some(ExportHandle {
                cancel,
                thread: Some(thread),
            }),
        })
    }
}

/// Starts an export with the default options and the given poster.
///
/// Equivalent to `SpawnOptions::new().poster(poster).spawn()`.
pub fn spawn<P: ErrorPoster>(poster: P) -> Result<Spawned, Error> {
    SpawnOptions::new().poster(poster).spawn()
}

/// The outcome of a successful [`spawn`].
#[derive(Debug)]
pub struct Spawned {
    /// What happened, fit for an informational log line.
    ///
    /// Names the redacted endpoint when the export started.
    pub message: String,
    /// The running export, or `None` if no endpoint was configured.
    pub handle: Option<ExportHandle>,
}

impl Spawned {
    fn not_started(message: String) -> Self {
        hmetrics_debug!("{}", message);
        Spawned {
            message,
            handle: None,
        }
    }

    /// Returns `true` if an export is running.
    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }
}

/// Controls a running export.
///
/// Dropping the handle leaves the export running for the rest of the
/// process; call [`cancel`](Self::cancel) to stop it.
pub struct ExportHandle {
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl ExportHandle {
    /// Asks the export to stop.
    ///
    /// The poster receives exactly one cancellation notice afterwards and
    /// no metrics are posted once it has.  Calling this again is a no-op.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for the export thread to finish.
    ///
    /// This blocks forever unless the export has been cancelled.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                hmetrics_debug!("export thread panicked");
            }
        }
    }

    /// Cancels the export and waits for its thread to finish.
    pub fn cancel_and_join(self) {
        self.cancel();
        self.join();
    }
}

impl fmt::Debug for ExportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportHandle")
            .field("cancelled", &self.is_cancelled())
            .field("running", &self.thread.is_some())
            .finish()
    }
}
