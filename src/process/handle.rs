use std::collections::HashMap;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use super::error::ProcessError;

/// Spawns `binary` with `args`/`env`/`workdir` as the leader of a new process group (§3
/// invariant 7), with stdout/stderr piped for [`crate::process::output_capture`].
///
/// `process_group(0)` (stable since Rust 1.64) asks the kernel to make the child's pid its own
/// pgid, with no `pre_exec`/`unsafe` needed: a signal sent to `-pid` then reaches the child and
/// every descendant it forks, which is the whole point of grouping. Protocol daemons commonly
/// fork helpers that would otherwise survive a single-pid SIGTERM.
pub fn spawn_in_new_group(
    binary: &Path,
    args: &[String],
    env: &HashMap<String, String>,
    workdir: Option<&Path>,
) -> Result<Child, ProcessError> {
    let mut cmd = Command::new(binary);
    cmd.args(args)
        .envs(env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }

    Ok(cmd.spawn()?)
}

/// Sends `signal` to the entire process group led by `pid`, by targeting the negative pid (the
/// POSIX convention for "the group", not just the leader).
pub fn signal_group(pid: u32, signal: Signal) -> Result<(), ProcessError> {
    let pgid = Pid::from_raw(-(pid as i32));
    match signal::kill(pgid, signal) {
        Ok(()) => Ok(()),
        // the group is already gone; Stop only cares about genuine failures (§4.1).
        Err(nix::Error::ESRCH) => Ok(()),
        Err(e) => Err(ProcessError::from(e)),
    }
}

pub fn terminate_group(pid: u32) -> Result<(), ProcessError> {
    signal_group(pid, Signal::SIGTERM)
}

pub fn kill_group(pid: u32) -> Result<(), ProcessError> {
    signal_group(pid, Signal::SIGKILL)
}
