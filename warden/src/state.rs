use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::endpoint::ServiceEndpoint;
use crate::launcher::BackendProcess;

/// Last known reachability of the published endpoint, for display layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub endpoint: Option<ServiceEndpoint>,
}

/// Point-in-time view of the supervisor state, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub connected: bool,
    pub starting: bool,
    /// Age of the in-flight start sequence; absent whenever `starting` is false.
    pub starting_for: Option<Duration>,
    pub attempts: u32,
    pub current_port: u16,
    pub has_child: bool,
    pub failed_sequences: u32,
}

/// The single shared supervisor state. Mutated only through [`StateGuard`]
/// operations; nothing else holds a reference to the fields.
#[derive(Debug)]
struct SupervisorState {
    connected: bool,
    starting: bool,
    started_at: Option<Instant>,
    attempts: u32,
    current_port: u16,
    child: Option<BackendProcess>,
    /// Completed-and-failed start sequences this session. Diagnostics only,
    /// never gates anything.
    failed_sequences: u32,
}

/// Serialization point for all supervisor state.
///
/// `try_acquire_start`/`release` bracket every start sequence; the dual grant
/// condition (idle, or in flight but older than the stuck threshold) is the
/// deadlock-breaker for a sequence whose owning task died without releasing.
pub struct StateGuard {
    stuck_threshold: Duration,
    state: Mutex<SupervisorState>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl StateGuard {
    pub fn new(
        initial_port: u16,
        stuck_threshold: Duration,
        status_tx: watch::Sender<ConnectionStatus>,
    ) -> Self {
        Self {
            stuck_threshold,
            state: Mutex::new(SupervisorState {
                connected: false,
                starting: false,
                started_at: None,
                attempts: 0,
                current_port: initial_port,
                child: None,
                failed_sequences: 0,
            }),
            status_tx,
        }
    }

    /// Grant ownership of a start sequence.
    ///
    /// Grants when no sequence is active, or when the active one has aged past
    /// the stuck threshold, in which case the stale sequence is forcibly
    /// cleared and a fresh one granted.
    pub async fn try_acquire_start(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.starting {
            let stuck = state
                .started_at
                .map_or(true, |at| at.elapsed() >= self.stuck_threshold);
            if !stuck {
                return false;
            }
            warn!(
                threshold_secs = self.stuck_threshold.as_secs(),
                "start sequence exceeded the stuck threshold; forcing a fresh one"
            );
        }
        state.starting = true;
        state.started_at = Some(Instant::now());
        state.attempts = 0;
        true
    }

    /// End the owned start sequence. Always clears `starting`/`started_at`;
    /// a failed sequence bumps the session failure counter.
    pub async fn release(&self, success: bool) {
        let mut state = self.state.lock().await;
        state.starting = false;
        state.started_at = None;
        if success {
            state.attempts = 0;
        } else {
            state.failed_sequences += 1;
        }
    }

    /// True while a start sequence is in flight and not yet presumed stuck.
    /// The monitor skips its cycle entirely when this holds.
    pub async fn start_in_flight(&self) -> bool {
        let state = self.state.lock().await;
        state.starting
            && state
                .started_at
                .is_some_and(|at| at.elapsed() < self.stuck_threshold)
    }

    /// Record one launch attempt within the owned sequence.
    pub async fn begin_attempt(&self, port: u16) {
        let mut state = self.state.lock().await;
        state.attempts += 1;
        state.current_port = port;
    }

    /// Publish the endpoint as reachable. Idempotent: repeating it for the
    /// same endpoint produces no new status event and no log line.
    pub async fn mark_connected(&self, endpoint: ServiceEndpoint) {
        {
            let mut state = self.state.lock().await;
            state.connected = true;
            state.current_port = endpoint.port;
        }
        let changed = self.status_tx.send_if_modified(|status| {
            if status.connected && status.endpoint.as_ref() == Some(&endpoint) {
                return false;
            }
            status.connected = true;
            status.endpoint = Some(endpoint.clone());
            true
        });
        if changed {
            info!(%endpoint, "backend connected");
        }
    }

    /// Mark the published endpoint unreachable. The endpoint itself stays
    /// published; it is what the monitor keeps rechecking.
    pub async fn mark_disconnected(&self) {
        {
            let mut state = self.state.lock().await;
            state.connected = false;
        }
        let changed = self.status_tx.send_if_modified(|status| {
            if !status.connected {
                return false;
            }
            status.connected = false;
            true
        });
        if changed {
            warn!("backend disconnected");
        }
    }

    /// Track a confirmed child, best-effort-terminating any previous one so
    /// retries cannot leak backend instances.
    pub async fn replace_child(&self, child: BackendProcess) {
        let mut state = self.state.lock().await;
        if let Some(mut previous) = state.child.replace(child) {
            debug!(port = previous.port(), "replacing tracked backend process");
            previous.terminate().await;
        }
    }

    /// Hand the tracked child to the caller (teardown, manual reset).
    pub async fn take_child(&self) -> Option<BackendProcess> {
        self.state.lock().await.child.take()
    }

    /// Whether a tracked child is still running. A child found exited is
    /// reaped and untracked here, so the monitor can recover on this cycle
    /// instead of waiting on a dead handle forever.
    pub async fn tracked_child_alive(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(mut child) = state.child.take() else {
            return false;
        };
        if let Some(status) = child.try_exit() {
            warn!(
                port = child.port(),
                code = status.code(),
                "tracked backend process has exited"
            );
            false
        } else {
            state.child = Some(child);
            true
        }
    }

    /// Manual-reset clearing: every flag back to its session-start value.
    pub async fn force_clear(&self) {
        {
            let mut state = self.state.lock().await;
            state.connected = false;
            state.starting = false;
            state.started_at = None;
            state.attempts = 0;
        }
        self.status_tx.send_if_modified(|status| {
            if !status.connected {
                return false;
            }
            status.connected = false;
            true
        });
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn published_endpoint(&self) -> Option<ServiceEndpoint> {
        self.status_tx.borrow().endpoint.clone()
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        let state = self.state.lock().await;
        StateSnapshot {
            connected: state.connected,
            starting: state.starting,
            starting_for: state.started_at.map(|at| at.elapsed()),
            attempts: state.attempts,
            current_port: state.current_port,
            has_child: state.child.is_some(),
            failed_sequences: state.failed_sequences,
        }
    }
}
