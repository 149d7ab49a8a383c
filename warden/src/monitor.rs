use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::endpoint::ServiceEndpoint;
use crate::error::StartError;
use crate::probe::probe;
use crate::supervisor::Supervisor;

/// Recurring reachability check for the published endpoint.
///
/// This is the only autonomous recovery path: a failed probe with no start
/// sequence in flight and no live tracked child triggers find-or-start.
/// Stops when `token` is cancelled, so session teardown is clean.
pub async fn run_monitor(supervisor: Supervisor, token: CancellationToken) {
    let mut ticker = tokio::time::interval(supervisor.config().monitor_interval);
    ticker.tick().await; // first tick is immediate; skip it
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("connection monitor stopped");
                return;
            }
            _ = ticker.tick() => {}
        }
        monitor_cycle(&supervisor).await;
    }
}

/// One monitor cycle. The guard check happens-before any probe: while a
/// fresh start sequence is in flight the cycle does nothing at all.
pub(crate) async fn monitor_cycle(supervisor: &Supervisor) {
    if supervisor.guard().start_in_flight().await {
        return;
    }

    let endpoint = supervisor.guard().published_endpoint().unwrap_or_else(|| {
        ServiceEndpoint::new(
            &supervisor.config().host,
            supervisor.config().port_range_start,
        )
    });

    if probe(
        supervisor.client(),
        &endpoint,
        supervisor.config().probe_timeout,
    )
    .await
    {
        supervisor.guard().mark_connected(endpoint).await;
        return;
    }

    supervisor.guard().mark_disconnected().await;

    // A live tracked child may still be booting; leave it to a later cycle.
    if supervisor.guard().tracked_child_alive().await {
        return;
    }

    match supervisor.ensure_backend().await {
        Ok(endpoint) => debug!(%endpoint, "backend recovered"),
        // Lost the race to another trigger; the owner will publish.
        Err(StartError::Busy) => {}
        Err(e) => error!("autonomous recovery failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::Supervisor;
    use crate::testutil::{serve_health, serve_health_pair, test_config};
    use std::time::Duration;

    #[tokio::test]
    async fn skips_the_cycle_while_a_fresh_start_sequence_is_in_flight() {
        let (port, _server) = serve_health("200 OK").await;
        let supervisor = Supervisor::new(test_config(port, port)).unwrap();

        assert!(supervisor.guard().try_acquire_start().await);
        monitor_cycle(&supervisor).await;

        // The endpoint is alive, but the guarded cycle never probed it.
        assert!(!supervisor.status().connected);
    }

    #[tokio::test]
    async fn marks_connected_when_the_default_endpoint_answers() {
        let (port, _server) = serve_health("200 OK").await;
        let supervisor = Supervisor::new(test_config(port, port)).unwrap();

        monitor_cycle(&supervisor).await;

        let status = supervisor.status();
        assert!(status.connected);
        assert_eq!(status.endpoint.map(|e| e.port), Some(port));
    }

    #[tokio::test]
    async fn recovers_by_discovering_elsewhere_in_the_range() {
        // Nothing on the range start; a healthy instance sits one port up.
        let (low, dead_server, _live_server) = serve_health_pair().await;
        dead_server.abort();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let live = low + 1;
        let supervisor = Supervisor::new(test_config(low, live)).unwrap();

        monitor_cycle(&supervisor).await;

        let status = supervisor.status();
        assert!(status.connected);
        let published = status.endpoint.map(|e| e.port).unwrap();
        assert!((low..=live).contains(&published));
        // Discovery, not spawning: the unspawnable test command was never tried.
        assert_eq!(supervisor.snapshot().await.attempts, 0);
    }

    #[tokio::test]
    async fn rechecks_the_published_endpoint_and_reports_loss() {
        let (port, server) = serve_health("200 OK").await;
        let supervisor = Supervisor::new(test_config(port, port)).unwrap();

        monitor_cycle(&supervisor).await;
        assert!(supervisor.status().connected);

        // Backend dies; recovery fails too (nothing to discover, command
        // unspawnable), so the worst steady state is disconnected-retrying.
        server.abort();
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor_cycle(&supervisor).await;

        let status = supervisor.status();
        assert!(!status.connected);
        assert_eq!(status.endpoint.map(|e| e.port), Some(port));
    }

    #[tokio::test]
    async fn stops_promptly_on_cancellation() {
        let supervisor = Supervisor::new(test_config(5000, 5000)).unwrap();
        let token = tokio_util::sync::CancellationToken::new();
        let handle = tokio::spawn(run_monitor(supervisor, token.clone()));

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor should stop on cancellation")
            .unwrap();
    }
}
