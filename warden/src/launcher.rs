use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::SpawnError;

/// Classification of one line of captured backend output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputClass {
    /// Forward to the log sink, nothing more.
    Info,
    /// The backend claims its HTTP listener is up. Optimistic early signal
    /// only; the prober has the final word on liveness.
    Ready,
    /// The chosen port is already bound; waiting out the poll budget is
    /// pointless.
    PortConflict,
}

const READY_MARKERS: &[&str] = &["running on", "listening on", "uvicorn running", "serving at"];

const CONFLICT_MARKERS: &[&str] = &[
    "address already in use",
    "eaddrinuse",
    "port is already allocated",
    // Windows wording
    "only one usage of each socket address",
];

/// Substring match against a captured output line. Inherently fragile across
/// backends and platforms, so callers treat `Ready`/`PortConflict` as fast
/// paths with the prober and the poll budget as the authoritative fallbacks.
pub fn classify_line(line: &str) -> OutputClass {
    let lower = line.to_ascii_lowercase();
    if CONFLICT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        OutputClass::PortConflict
    } else if READY_MARKERS.iter().any(|marker| lower.contains(marker)) {
        OutputClass::Ready
    } else {
        OutputClass::Info
    }
}

/// A classified signal surfaced from a launched backend's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchEvent {
    Ready,
    PortConflict,
}

/// Spawns the backend on a candidate port and wires its output streams.
#[derive(Debug, Clone)]
pub struct Launcher {
    commands: Vec<String>,
    args: Vec<String>,
    dir: PathBuf,
}

impl Launcher {
    pub fn from_config(config: &Config) -> Self {
        Self {
            commands: config.backend_command.clone(),
            args: config.backend_args.clone(),
            dir: config.backend_dir.clone(),
        }
    }

    pub fn new(commands: Vec<String>, args: Vec<String>, dir: PathBuf) -> Self {
        Self {
            commands,
            args,
            dir,
        }
    }

    /// Spawn the backend bound to `port`, trying command candidates in order
    /// until one starts. The child runs detached from this process's
    /// lifetime; the returned handle keeps the right to kill it.
    pub async fn launch(&self, port: u16) -> Result<BackendProcess, SpawnError> {
        let mut last_err = None;
        for candidate in &self.commands {
            match self.spawn_candidate(candidate, port) {
                Ok(mut child) => {
                    let (tx, events) = mpsc::channel(16);
                    wire_output(&mut child, port, tx);
                    info!(command = %candidate, port, "backend launched");
                    return Ok(BackendProcess {
                        port,
                        child,
                        events,
                        events_closed: false,
                    });
                }
                Err(e) => {
                    warn!(command = %candidate, port, "backend spawn failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        Err(SpawnError {
            tried: self.commands.clone(),
            source: last_err,
        })
    }

    fn spawn_candidate(&self, command: &str, port: u16) -> std::io::Result<Child> {
        let mut cmd = Command::new(command);
        cmd.args(&self.args)
            .current_dir(&self.dir)
            .env("SERVER_PORT", port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Detach: closing the panel must not take the backend down with it,
        // though the tracked handle retains the right to kill.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        #[cfg(windows)]
        cmd.creation_flags(0x0800_0000); // CREATE_NO_WINDOW

        cmd.spawn()
    }
}

fn wire_output(child: &mut Child, port: u16, tx: mpsc::Sender<LaunchEvent>) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(read_lines(stdout, port, "stdout", tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(read_lines(stderr, port, "stderr", tx));
    }
}

async fn read_lines<R: AsyncRead + Unpin>(
    reader: R,
    port: u16,
    stream: &'static str,
    tx: mpsc::Sender<LaunchEvent>,
) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match classify_line(&line) {
            OutputClass::Info => {
                if stream == "stderr" {
                    warn!(target: "backend", port, "{line}");
                } else {
                    info!(target: "backend", port, "{line}");
                }
            }
            OutputClass::Ready => {
                info!(port, "backend reports its listener is up");
                let _ = tx.try_send(LaunchEvent::Ready);
            }
            OutputClass::PortConflict => {
                warn!(port, "backend reports the port is already bound");
                let _ = tx.try_send(LaunchEvent::PortConflict);
            }
        }
    }
}

/// A spawned backend instance: the child handle plus the stream of classified
/// output signals. Owned exclusively by the supervisor; at most one is
/// tracked at a time.
#[derive(Debug)]
pub struct BackendProcess {
    port: u16,
    child: Child,
    events: mpsc::Receiver<LaunchEvent>,
    events_closed: bool,
}

impl BackendProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait up to `window` for the next classified output signal. Once both
    /// output streams have closed this degrades to a plain sleep so callers
    /// keep their poll cadence.
    pub async fn next_event(&mut self, window: Duration) -> Option<LaunchEvent> {
        if self.events_closed {
            tokio::time::sleep(window).await;
            return None;
        }
        match tokio::time::timeout(window, self.events.recv()).await {
            Ok(Some(event)) => Some(event),
            Ok(None) => {
                self.events_closed = true;
                None
            }
            Err(_) => None,
        }
    }

    /// Exit status if the process has already terminated.
    pub fn try_exit(&mut self) -> Option<std::process::ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Best-effort termination; an already-dead process is not an error.
    pub async fn terminate(&mut self) {
        if self.child.kill().await.is_ok() {
            debug!(port = self.port, "backend process terminated");
        }
    }
}

/// Last-resort sweep: kill every process matching `name`, whether or not this
/// supervisor spawned it. Only the manual reset path may call this, and only
/// when explicitly asked to go system-wide.
pub(crate) async fn kill_matching(name: &str) {
    #[cfg(unix)]
    let status = Command::new("pkill").arg("-f").arg(name).status().await;
    #[cfg(windows)]
    let status = Command::new("taskkill").args(["/F", "/IM", name]).status().await;

    match status {
        Ok(code) => debug!(name, %code, "system-wide kill issued"),
        Err(e) => warn!(name, "system-wide kill failed to run: {e}"),
    }
}
