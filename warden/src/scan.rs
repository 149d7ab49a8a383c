use std::ops::RangeInclusive;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};

use crate::endpoint::ServiceEndpoint;
use crate::probe::probe;

/// Probe every port in `range` concurrently and return the first responder.
///
/// All probes start together; whichever healthy endpoint settles first wins
/// and the in-flight remainder is dropped. Sequential scanning at
/// multi-hundred-ms probe timeouts would cost the whole range's worth of
/// timeouts back to back.
pub async fn scan_first(
    client: &reqwest::Client,
    host: &str,
    range: RangeInclusive<u16>,
    timeout: Duration,
) -> Option<ServiceEndpoint> {
    let mut probes: FuturesUnordered<_> = range
        .map(|port| {
            let endpoint = ServiceEndpoint::new(host, port);
            async move {
                let alive = probe(client, &endpoint, timeout).await;
                (endpoint, alive)
            }
        })
        .collect();

    while let Some((endpoint, alive)) = probes.next().await {
        if alive {
            return Some(endpoint);
        }
    }
    None
}

/// Probe every port in `range` concurrently and return all responders,
/// lowest port first.
pub async fn scan_all(
    client: &reqwest::Client,
    host: &str,
    range: RangeInclusive<u16>,
    timeout: Duration,
) -> Vec<ServiceEndpoint> {
    let probes: FuturesUnordered<_> = range
        .map(|port| {
            let endpoint = ServiceEndpoint::new(host, port);
            async move {
                let alive = probe(client, &endpoint, timeout).await;
                (endpoint, alive)
            }
        })
        .collect();

    let mut responsive: Vec<ServiceEndpoint> = probes
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .filter_map(|(endpoint, alive)| alive.then_some(endpoint))
        .collect();
    responsive.sort_by_key(|endpoint| endpoint.port);
    responsive
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{free_port, serve_health, serve_health_pair};

    fn client() -> reqwest::Client {
        reqwest::Client::new()
    }

    #[tokio::test]
    async fn first_match_finds_the_only_listener() {
        let (port, _server) = serve_health("200 OK").await;
        let range = port.saturating_sub(1)..=port.saturating_add(1);

        let found = scan_first(&client(), "127.0.0.1", range, Duration::from_millis(500)).await;
        assert_eq!(found, Some(ServiceEndpoint::new("127.0.0.1", port)));
    }

    #[tokio::test]
    async fn first_match_is_none_for_a_dead_range() {
        let port = free_port();
        let range = port..=port.saturating_add(2);

        let found = scan_first(&client(), "127.0.0.1", range, Duration::from_millis(500)).await;
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn scan_all_reports_every_responder_lowest_port_first() {
        let (low, _server_a, _server_b) = serve_health_pair().await;
        let high = low + 1;

        let responsive =
            scan_all(&client(), "127.0.0.1", low..=high, Duration::from_millis(500)).await;
        assert_eq!(
            responsive,
            vec![
                ServiceEndpoint::new("127.0.0.1", low),
                ServiceEndpoint::new("127.0.0.1", high),
            ]
        );
    }
}
