use std::process::ExitStatus;

use thiserror::Error;

/// The supervisor's error taxonomy (§7). Kinds, not wrapped types: each variant carries enough
/// context for `lastError` and for `OnStop` without requiring callers to downcast.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to spawn child: {0}")]
    SpawnFailed(#[source] crate::process::ProcessError),

    #[error("start called while already running")]
    AlreadyRunning,

    #[error("child exited: {0}")]
    ChildExited(ExitStatus),

    #[error("child hung, killed after {failure_count} consecutive recoverable probe failures ({last_probe_error}); forced kill {kill_outcome}")]
    HungKilled {
        failure_count: u32,
        #[source]
        last_probe_error: crate::health::ProbeError,
        kill_outcome: KillOutcome,
    },

    #[error("forced-kill failed: {0}")]
    StopFailed(#[source] crate::process::ProcessError),
}

/// Whether the forced kill issued after a hung-child verdict (§4.3) itself succeeded.
#[derive(Debug)]
pub enum KillOutcome {
    Killed,
    Failed(crate::process::ProcessError),
}

impl std::fmt::Display for KillOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillOutcome::Killed => write!(f, "succeeded"),
            KillOutcome::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}
