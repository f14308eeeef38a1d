use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client as ReqwestClient, StatusCode};
use url::Url;

use crate::error::HttpFailureError;
use crate::redact::redact_url;
use crate::Error;

// Stands in for an endpoint that could not even be redacted.
const UNREDACTABLE_URL: &str = "<unredactable endpoint>";

/// Posts one encoded metrics document to `url`.
///
/// The request must complete within `timeout`.  Exactly `200 OK` counts as
/// success; any other status is reported as an [`HttpFailureError`]
/// naming the redacted endpoint.  Transport errors are passed on with the
/// endpoint in them redacted too.
pub(crate) async fn submit_metrics(
    client: &ReqwestClient,
    body: Vec<u8>,
    url: &Url,
    user_agent: &str,
    timeout: Duration,
) -> Result<(), Error> {
    let response = client
        .post(url.as_str())
        .header(CONTENT_TYPE, "application/json")
        .header(USER_AGENT, user_agent)
        .timeout(timeout)
        .body(body)
        .send()
        .await
        .map_err(|err| match redact_url(url) {
            // reqwest errors name the url they failed on
            Ok(safe) => err.with_url(safe),
            Err(_) => err.without_url(),
        })?;

    let status = response.status();
    if status != StatusCode::OK {
        let safe = redact_url(url)
            .map(String::from)
            .unwrap_or_else(|_| UNREDACTABLE_URL.to_string());
        return Err(HttpFailureError {
            expected: StatusCode::OK.as_u16(),
            actual: status.as_u16(),
            url: safe,
            comment: status.canonical_reason().unwrap_or_default().to_string(),
        }
        .into());
    }

    match response.bytes().await {
        Ok(body) => hmetrics_debug!("metrics accepted ({} byte response)", body.len()),
        Err(err) => hmetrics_debug!("failed to read metrics response: {}", err),
    }
    Ok(())
}
