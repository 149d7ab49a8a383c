use std::time::Duration;

use tracing::trace;

use crate::endpoint::ServiceEndpoint;

/// One bounded liveness check against the endpoint's health path.
///
/// Success is any HTTP response with a success status inside `timeout`; the
/// body is ignored. Transport errors, timeouts and non-success statuses all
/// map to `false`; the prober never raises, retrying is the caller's call.
pub async fn probe(
    client: &reqwest::Client,
    endpoint: &ServiceEndpoint,
    timeout: Duration,
) -> bool {
    match client
        .get(endpoint.health_url())
        .timeout(timeout)
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            trace!(%endpoint, "health probe failed: {e}");
            false
        }
    }
}
