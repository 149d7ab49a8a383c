use std::fmt;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::Config;
use crate::endpoint::ServiceEndpoint;
use crate::error::StartError;
use crate::launcher::{BackendProcess, LaunchEvent, Launcher};
use crate::probe::probe;
use crate::scan::scan_first;
use crate::state::StateGuard;

/// Outcome of one launch attempt on a single port. Everything but
/// `Confirmed` advances the sequence to the next port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
    PortConflict,
    Exited(Option<i32>),
    HealthTimeout,
    SpawnFailed(String),
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::PortConflict => write!(f, "port conflict"),
            AttemptOutcome::Exited(Some(code)) => write!(f, "exited with code {code}"),
            AttemptOutcome::Exited(None) => write!(f, "exited abnormally"),
            AttemptOutcome::HealthTimeout => write!(f, "health confirmation timed out"),
            AttemptOutcome::SpawnFailed(e) => write!(f, "spawn failed: {e}"),
        }
    }
}

enum Attempt {
    Confirmed(BackendProcess),
    Failed(AttemptOutcome),
}

/// Discover an already-running backend or launch one, walking the port range
/// in order.
///
/// Discovery runs first so a previous session's instance is adopted instead
/// of spawned over. The per-port walk is an explicit loop: ports attempted
/// are strictly increasing, and the sequence ends in at most one launch
/// attempt per port in the range.
///
/// Returns the confirmed endpoint, together with the child handle when this
/// call spawned it (`None` for a discovered instance). The caller owns the
/// guard acquisition bracketing this sequence.
pub async fn find_or_start(
    client: &reqwest::Client,
    config: &Config,
    launcher: &Launcher,
    guard: &StateGuard,
) -> Result<(ServiceEndpoint, Option<BackendProcess>), StartError> {
    info!(
        start = config.port_range_start,
        end = config.port_range_end,
        "scanning for a running backend"
    );
    if let Some(found) = scan_first(
        client,
        &config.host,
        config.port_range(),
        config.probe_timeout,
    )
    .await
    {
        info!(%found, "discovered running backend");
        return Ok((found, None));
    }

    let mut attempts: Vec<(u16, AttemptOutcome)> = Vec::new();
    for port in config.port_range() {
        if !attempts.is_empty() {
            sleep(config.retry_delay).await;
        }
        guard.begin_attempt(port).await;

        match attempt_port(client, config, launcher, port).await {
            Attempt::Confirmed(backend) => {
                let endpoint = ServiceEndpoint::new(&config.host, port);
                info!(%endpoint, "backend confirmed healthy");
                return Ok((endpoint, Some(backend)));
            }
            Attempt::Failed(outcome) => {
                warn!(port, %outcome, "launch attempt failed; advancing to the next port");
                attempts.push((port, outcome));
            }
        }
    }

    Err(StartError::RangeExhausted {
        start: config.port_range_start,
        end: config.port_range_end,
        attempts: attempts.len() as u32,
        summary: summarize(&attempts),
    })
}

/// One launch-and-confirm attempt on `port`. The child is terminated before
/// returning on every failing outcome, so at most one backend instance ever
/// outlives an attempt.
async fn attempt_port(
    client: &reqwest::Client,
    config: &Config,
    launcher: &Launcher,
    port: u16,
) -> Attempt {
    let endpoint = ServiceEndpoint::new(&config.host, port);
    let mut backend = match launcher.launch(port).await {
        Ok(backend) => backend,
        Err(e) => return Attempt::Failed(AttemptOutcome::SpawnFailed(e.to_string())),
    };

    let mut polls = 0u32;
    let outcome = loop {
        // Output signals preempt the poll cadence: a conflict line makes the
        // rest of the budget pointless, and a ready line is worth an
        // immediate probe. Neither replaces probe confirmation.
        let event = backend.next_event(config.poll_interval).await;
        if event == Some(LaunchEvent::PortConflict) {
            break AttemptOutcome::PortConflict;
        }
        if let Some(status) = backend.try_exit() {
            break AttemptOutcome::Exited(status.code());
        }
        if probe(client, &endpoint, config.probe_timeout).await {
            return Attempt::Confirmed(backend);
        }
        polls += 1;
        if polls >= config.poll_attempts {
            break AttemptOutcome::HealthTimeout;
        }
    };

    backend.terminate().await;
    Attempt::Failed(outcome)
}

fn summarize(attempts: &[(u16, AttemptOutcome)]) -> String {
    attempts
        .iter()
        .map(|(port, outcome)| format!("{port}: {outcome}"))
        .collect::<Vec<_>>()
        .join(", ")
}
