use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::controller;
use crate::endpoint::ServiceEndpoint;
use crate::error::StartError;
use crate::launcher::{self, Launcher};
use crate::monitor;
use crate::state::{ConnectionStatus, StateGuard, StateSnapshot};

/// How far a manual reset reaches when killing backend processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillScope {
    /// Only the child this supervisor spawned and still tracks.
    TrackedOnly,
    /// Also sweep every process matching the configured backend process name.
    /// Last resort: this can hit processes the supervisor never spawned.
    SystemWide,
}

/// Owns the backend dependency for one client session: discovery, launch,
/// health monitoring and recovery, serialized behind the state guard.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    client: reqwest::Client,
    launcher: Launcher,
    guard: StateGuard,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.probe_timeout)
            .build()?;
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        let guard = StateGuard::new(config.port_range_start, config.stuck_threshold, status_tx);
        let launcher = Launcher::from_config(&config);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                client,
                launcher,
                guard,
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Make the backend reachable: the guarded find-or-start entry point.
    ///
    /// Exactly one caller at a time wins the guard; concurrent triggers get
    /// [`StartError::Busy`] and should leave the owner to finish.
    pub async fn ensure_backend(&self) -> Result<ServiceEndpoint, StartError> {
        if !self.inner.guard.try_acquire_start().await {
            return Err(StartError::Busy);
        }
        let result = controller::find_or_start(
            &self.inner.client,
            &self.inner.config,
            &self.inner.launcher,
            &self.inner.guard,
        )
        .await;
        match result {
            Ok((endpoint, child)) => {
                if let Some(child) = child {
                    self.inner.guard.replace_child(child).await;
                }
                self.inner.guard.mark_connected(endpoint.clone()).await;
                self.inner.guard.release(true).await;
                Ok(endpoint)
            }
            Err(e) => {
                self.inner.guard.release(false).await;
                Err(e)
            }
        }
    }

    /// Spawn the recurring connection monitor. It stops when [`Supervisor::shutdown`]
    /// cancels the session token.
    pub fn spawn_monitor(&self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(monitor::run_monitor(
            self.clone(),
            self.inner.shutdown.clone(),
        ))
    }

    /// Manual reset entry point: kill, clear, pause, find-or-start again.
    ///
    /// [`KillScope::TrackedOnly`] terminates the tracked child;
    /// [`KillScope::SystemWide`] additionally sweeps any process matching the
    /// configured backend process name, spawned here or not.
    pub async fn reset(&self, scope: KillScope) -> Result<ServiceEndpoint, StartError> {
        warn!(?scope, "manual backend reset requested");
        if let Some(mut child) = self.inner.guard.take_child().await {
            child.terminate().await;
        }
        if scope == KillScope::SystemWide {
            launcher::kill_matching(&self.inner.config.backend_process_name).await;
        }
        self.inner.guard.force_clear().await;
        sleep(self.inner.config.reset_delay).await;
        self.ensure_backend().await
    }

    /// Session teardown: stop the monitor and best-effort terminate the
    /// tracked child.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        if let Some(mut child) = self.inner.guard.take_child().await {
            child.terminate().await;
            info!("backend terminated on shutdown");
        }
    }

    /// Current published status, for display.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.guard.status()
    }

    /// Watch stream of status changes; connected transitions are deduplicated.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.guard.subscribe()
    }

    /// Currently published endpoint, if one has been resolved this session.
    pub fn endpoint(&self) -> Option<ServiceEndpoint> {
        self.inner.guard.published_endpoint()
    }

    /// Diagnostics snapshot of the supervisor state.
    pub async fn snapshot(&self) -> StateSnapshot {
        self.inner.guard.snapshot().await
    }

    pub(crate) fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.inner.client
    }

    pub(crate) fn guard(&self) -> &StateGuard {
        &self.inner.guard
    }
}
