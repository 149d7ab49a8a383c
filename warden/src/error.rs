use thiserror::Error;

/// None of the configured backend commands could be spawned.
///
/// Carries every candidate that was tried plus the last OS error, so the
/// diagnostic names the executable the operator needs to install or fix.
#[derive(Debug, Error)]
#[error("no backend command could be spawned (tried: {tried:?})")]
pub struct SpawnError {
    pub tried: Vec<String>,
    #[source]
    pub source: Option<std::io::Error>,
}

/// Terminal outcomes of a find-or-start sequence.
///
/// Everything recoverable (probe failures, port conflicts, per-port poll
/// budgets) is absorbed inside the controller; only these two surface.
#[derive(Debug, Error)]
pub enum StartError {
    /// Another start sequence already owns the launch right. Not a failure;
    /// the caller simply lost the race and should leave the owner to it.
    #[error("a backend start sequence is already in flight")]
    Busy,

    /// Every port in the configured range was tried without a confirmed
    /// backend. Recovery needs the next monitor cycle or a manual reset.
    #[error(
        "no backend became healthy on ports {start}-{end} \
         after {attempts} launch attempts ({summary})"
    )]
    RangeExhausted {
        start: u16,
        end: u16,
        attempts: u32,
        summary: String,
    },
}
