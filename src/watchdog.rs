use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

use crate::context::Context;
use crate::health::{HealthProbe, ProbeError};
use crate::process::{kill_group, ProcessError};

/// How often the watchdog polls for the child's exit status between health-check ticks. Small
/// enough that cancellation and exit are observed promptly without busy-spinning.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Three consecutive recoverable probe failures declare the child hung (§4.3): a 90s window at
/// the default 30s cadence, well below customer-noticeable downtime and well above probe jitter.
pub const HUNG_KILL_THRESHOLD: u32 = 3;

/// How long to wait for the exit channel to resolve after a hung-kill, before giving up on
/// observing the status (§4.3).
const HUNG_EXIT_WAIT: Duration = Duration::from_secs(5);

/// How [`wait_for_exit_or_health_failure`] resolved (§4.3).
pub enum WatchdogExit {
    /// The child exited on its own (crash or clean exit).
    Exited(ExitStatus),
    /// `ctx` was cancelled; an expected shutdown, not a failure.
    Cancelled,
    /// Three consecutive recoverable probe failures; the child was forcibly killed.
    Hung {
        last_probe_error: ProbeError,
        kill_result: Result<(), ProcessError>,
        exited: Option<ExitStatus>,
    },
}

/// The heart of the supervisor (§4.3): concurrently awaits the child's natural exit and
/// periodic health probes, returning whichever resolves first.
///
/// `probe` is the single callable the watchdog invokes every `health_check_interval`; `None`
/// degrades the watchdog to "wait for exit" only, per the boundary behavior in §8.
/// `on_probe_failure` is invoked for every probe failure, recoverable or not, before the
/// consecutive-failure count is checked against [`HUNG_KILL_THRESHOLD`], so callers can react to
/// specific layers (e.g. `resetOnBusFailure`, §4.5, or surfacing a non-recoverable failure's
/// message as `lastError` without touching restart state) without waiting for the 3-strike
/// threshold.
pub fn wait_for_exit_or_health_failure(
    child: &mut Child,
    pid: u32,
    mut probe: Option<&mut dyn HealthProbe>,
    health_check_interval: Duration,
    probe_timeout: Duration,
    ctx: &Context,
    mut on_probe_failure: Option<&mut dyn FnMut(&ProbeError)>,
) -> WatchdogExit {
    let mut consecutive_failures = 0u32;
    let mut last_tick = Instant::now();

    loop {
        // `wait_timeout` doubles as this loop's sleep: it returns early the instant `ctx` is
        // cancelled, and otherwise blocks for the poll interval.
        if ctx.wait_timeout(POLL_INTERVAL) {
            return WatchdogExit::Cancelled;
        }

        if let Ok(Some(status)) = child.try_wait() {
            return WatchdogExit::Exited(status);
        }

        let Some(probe_ref) = probe.as_deref_mut() else {
            continue;
        };

        if last_tick.elapsed() < health_check_interval {
            continue;
        }
        last_tick = Instant::now();

        match probe_ref.check(pid, probe_timeout) {
            Ok(()) => {
                if consecutive_failures > 0 {
                    tracing::info!(pid, "health probe recovered after {consecutive_failures} failures");
                }
                consecutive_failures = 0;
            }
            Err(e) if !e.recoverable => {
                // Restart cannot cure hardware absence; wait for it to come back (§4.4).
                tracing::warn!(pid, error = %e, "non-recoverable health probe failure, continuing to monitor");
                consecutive_failures = 0;
                if let Some(hook) = on_probe_failure.as_deref_mut() {
                    hook(&e);
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(pid, error = %e, consecutive_failures, "recoverable health probe failure");
                if let Some(hook) = on_probe_failure.as_deref_mut() {
                    hook(&e);
                }
                if consecutive_failures >= HUNG_KILL_THRESHOLD {
                    tracing::error!(pid, "child hung after {consecutive_failures} consecutive probe failures, killing");
                    let kill_result = kill_group(pid);
                    let exited = wait_with_timeout(child, HUNG_EXIT_WAIT);
                    return WatchdogExit::Hung {
                        last_probe_error: e,
                        kill_result,
                        exited,
                    };
                }
            }
        }
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let start = Instant::now();
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Some(status);
        }
        if start.elapsed() >= timeout {
            return None;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ProbeError;
    use std::process::Command;

    struct AlwaysFails;
    impl HealthProbe for AlwaysFails {
        fn check(&mut self, _pid: u32, _timeout: Duration) -> Result<(), ProbeError> {
            Err(ProbeError {
                layer: crate::health::Layer::L2Transport,
                recoverable: true,
                message: "unreachable".to_string(),
            })
        }
    }

    struct AlwaysPasses;
    impl HealthProbe for AlwaysPasses {
        fn check(&mut self, _pid: u32, _timeout: Duration) -> Result<(), ProbeError> {
            Ok(())
        }
    }

    fn spawn_sleep(secs: u64) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(format!("sleep {secs}"))
            .spawn()
            .unwrap()
    }

    #[test]
    fn returns_exited_when_child_exits_on_its_own() {
        let mut child = Command::new("sh").arg("-c").arg("exit 1").spawn().unwrap();
        let ctx = Context::new();

        let outcome = wait_for_exit_or_health_failure(
            &mut child,
            child.id(),
            None,
            Duration::from_secs(999),
            Duration::from_secs(1),
            &ctx,
            None,
        );

        match outcome {
            WatchdogExit::Exited(status) => assert_eq!(status.code(), Some(1)),
            _ => panic!("expected Exited"),
        }
    }

    #[test]
    fn returns_cancelled_when_context_is_cancelled() {
        let mut child = spawn_sleep(30);
        let pid = child.id();
        let ctx = Context::new();
        let canceller = ctx.clone();

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            canceller.cancel().unwrap();
        });

        let outcome = wait_for_exit_or_health_failure(
            &mut child,
            pid,
            None,
            Duration::from_secs(999),
            Duration::from_secs(1),
            &ctx,
            None,
        );

        assert!(matches!(outcome, WatchdogExit::Cancelled));
        let _ = kill_group(pid);
        let _ = child.wait();
    }

    #[test]
    fn three_consecutive_recoverable_failures_kill_the_child() {
        let mut child = spawn_sleep(30);
        let pid = child.id();
        let ctx = Context::new();
        let mut probe = AlwaysFails;

        let outcome = wait_for_exit_or_health_failure(
            &mut child,
            pid,
            Some(&mut probe),
            Duration::from_millis(10),
            Duration::from_secs(1),
            &ctx,
            None,
        );

        match outcome {
            WatchdogExit::Hung {
                kill_result,
                exited,
                ..
            } => {
                assert!(kill_result.is_ok());
                assert!(exited.is_some());
            }
            _ => panic!("expected Hung"),
        }
    }

    #[test]
    fn passing_probe_never_triggers_a_kill() {
        let mut child = spawn_sleep(1);
        let pid = child.id();
        let ctx = Context::new();
        let mut probe = AlwaysPasses;

        let outcome = wait_for_exit_or_health_failure(
            &mut child,
            pid,
            Some(&mut probe),
            Duration::from_millis(10),
            Duration::from_secs(1),
            &ctx,
            None,
        );

        assert!(matches!(outcome, WatchdogExit::Exited(_)));
    }

    #[test]
    fn recoverable_failure_hook_is_invoked() {
        let mut child = spawn_sleep(30);
        let pid = child.id();
        let ctx = Context::new();
        let mut probe = AlwaysFails;
        let mut hook_calls = 0u32;
        let mut hook = |_err: &ProbeError| hook_calls += 1;

        let _ = wait_for_exit_or_health_failure(
            &mut child,
            pid,
            Some(&mut probe),
            Duration::from_millis(10),
            Duration::from_secs(1),
            &ctx,
            Some(&mut hook),
        );

        assert_eq!(hook_calls, HUNG_KILL_THRESHOLD);
    }
}
