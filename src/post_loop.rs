//! The fixed-interval collect-and-post loop.

use std::fmt;
use std::sync::Arc;

use reqwest::Client as ReqwestClient;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::collect::{gather_metrics, Baseline, RuntimeStats};
use crate::submit::submit_metrics;
use crate::{Error, ErrorPoster, Tunables};

/// Everything one post loop run needs.
pub(crate) struct PostLoop {
    pub endpoint: Url,
    pub tunables: Arc<Tunables>,
    pub poster: Arc<dyn ErrorPoster>,
    pub stats: Arc<dyn RuntimeStats>,
    pub client: Option<ReqwestClient>,
}

impl PostLoop {
    fn http_client(&self) -> Result<ReqwestClient, Error> {
        match self.client {
            Some(ref client) => Ok(client.clone()),
            None => ReqwestClient::builder().build().map_err(Error::ClientBuild),
        }
    }

    /// Collects and posts metrics once per interval until `cancel` fires.
    ///
    /// Failures of a single tick go to the poster and the loop carries on
    /// with the next tick.  The return value is why the run ended: either
    /// [`Error::Cancelled`] or a failure to set up the run at all.
    pub async fn run(&self, cancel: &CancellationToken) -> Error {
        // read once per run; a changed interval applies from the next run
        let interval = self.tunables.metrics_post_interval();
        let client = match self.http_client() {
            Ok(client) => client,
            Err(err) => return err,
        };
        let mut timeout = self.tunables.effective_http_timeout(interval);

        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut baseline = Baseline::default();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Error::Cancelled,
                _ = ticker.tick() => {}
            }

            let current = self.tunables.effective_http_timeout(interval);
            if current != timeout {
                hmetrics_debug!("http timeout changed from {:?} to {:?}", timeout, current);
                timeout = current;
            }

            let body = match gather_metrics(&*self.stats, baseline) {
                Ok((body, next)) => {
                    baseline = next;
                    body
                }
                Err(err) => {
                    self.poster.post(&err);
                    continue;
                }
            };

            let user_agent = self.tunables.http_user_agent();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Error::Cancelled,
                result = submit_metrics(&client, body, &self.endpoint, &user_agent, timeout) => {
                    if let Err(err) = result {
                        self.poster.post(&err);
                    }
                }
            }
        }
    }
}

impl fmt::Debug for PostLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the endpoint may carry credentials
        f.debug_struct("PostLoop")
            .field("tunables", &self.tunables)
            .field("custom_client", &self.client.is_some())
            .finish()
    }
}
