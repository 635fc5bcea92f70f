use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::backoff::Backoff;
use crate::clock::{Clock, SystemClock};
use crate::context::{Context, Done};
use crate::error::{KillOutcome, SupervisorError};
use crate::health::{HealthProbe, Layer, ProbeError};
use crate::hooks::{NoopHooks, SupervisorHooks};
use crate::policy::SupervisorPolicy;
use crate::process::{self, Logger, ProcessError, TracingLogger};
use crate::stats::{Stats, Status};
use crate::usb::UsbResetter;
use crate::watchdog::{self, WatchdogExit};

/// Owns exactly one child process at a time and enforces start/stop/restart policy (§3, §4.1).
///
/// Cheaply cloneable: clones share the same underlying state, which is how the background
/// monitor thread observes and updates the same supervisor the caller holds.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    policy: SupervisorPolicy,
    hooks: Arc<dyn SupervisorHooks>,
    probe_factory: Option<Arc<dyn Fn() -> Box<dyn HealthProbe> + Send + Sync>>,
    usb_resetter: Option<UsbResetter>,
    clock: Arc<dyn Clock>,
    logger: Mutex<Arc<dyn Logger>>,
    backoff: Mutex<Backoff>,
    state: Mutex<State>,
    /// `ctx`/`done` for the in-flight cycle, if any. Cloneable (§9: `Context<T>` carried
    /// verbatim from the teacher), so `Stop` can act on it without taking exclusive ownership
    /// away from the monitor thread mid-cycle.
    cycle: Mutex<Option<CycleHandle>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
struct CycleHandle {
    ctx: Context,
    done: Done,
}

struct State {
    status: Status,
    pid: u32,
    start_time: Option<Instant>,
    last_error: Option<String>,
    stop_requested: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            status: Status::Stopped,
            pid: 0,
            start_time: None,
            last_error: None,
            stop_requested: false,
        }
    }
}

impl Supervisor {
    pub fn new(policy: SupervisorPolicy) -> Self {
        Self::with_hooks(policy, Arc::new(NoopHooks))
    }

    pub fn with_hooks(policy: SupervisorPolicy, hooks: Arc<dyn SupervisorHooks>) -> Self {
        let backoff = Backoff::new(policy.restart_delay, policy.max_restart_delay, policy.stable_threshold);
        Supervisor {
            inner: Arc::new(Inner {
                policy,
                hooks,
                probe_factory: None,
                usb_resetter: None,
                clock: Arc::new(SystemClock),
                logger: Mutex::new(Arc::new(TracingLogger)),
                backoff: Mutex::new(backoff),
                state: Mutex::new(State::default()),
                cycle: Mutex::new(None),
                monitor: Mutex::new(None),
            }),
        }
    }

    /// Installs the health-probe factory invoked once per spawn (§4.1 `healthCheckFunc`). A
    /// factory rather than a single boxed probe because layered probes such as
    /// [`crate::health::ProcessStateProbe`] carry per-pid history (the D-state streak) that must
    /// not leak across respawns.
    pub fn with_health_probe_factory(
        mut self,
        factory: Arc<dyn Fn() -> Box<dyn HealthProbe> + Send + Sync>,
    ) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("Supervisor is uniquely owned during construction")
            .probe_factory = Some(factory);
        self
    }

    pub fn with_usb_resetter(mut self, resetter: UsbResetter) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("Supervisor is uniquely owned during construction")
            .usb_resetter = Some(resetter);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("Supervisor is uniquely owned during construction")
            .clock = clock;
        self
    }

    /// Replaces the internal log sink (§4.1 `SetLogger`). Callable at any time; takes effect for
    /// the next line captured from the child.
    pub fn set_logger(&self, logger: Arc<dyn Logger>) {
        *self.inner.logger.lock().unwrap() = logger;
    }

    /// Spawns the child and returns once it is `Running` (§4.1). A background monitor thread
    /// then owns the cycle until `Stop` is called, `ctx` is cancelled, or the restart policy is
    /// exhausted. Equivalent to `start_with_context(Context::new())`.
    pub fn start(&self) -> Result<(), SupervisorError> {
        self.start_with_context(Context::new())
    }

    /// As [`start`](Self::start), but bounds the cycle to an externally supplied [`Context`]
    /// instead of one scoped only to this call (§4.1: "the passed context bounds the entire
    /// cycle"). Cancelling `ctx` is equivalent to calling [`stop`](Self::stop) without forcing a
    /// kill path (§5).
    pub fn start_with_context(&self, ctx: Context) -> Result<(), SupervisorError> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if matches!(state.status, Status::Starting | Status::Running) {
                return Err(SupervisorError::AlreadyRunning);
            }
            state.status = Status::Starting;
            state.stop_requested = false;
            state.last_error = None;
        }
        self.inner.backoff.lock().unwrap().reset();

        let done = Done::new();
        *self.inner.cycle.lock().unwrap() = Some(CycleHandle { ctx: ctx.clone(), done: done.clone() });

        let mut child = match self.spawn_child() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(name = %self.inner.policy.name, error = %e, "spawn failed");
                let mut state = self.inner.state.lock().unwrap();
                state.status = Status::Failed;
                state.last_error = Some(e.to_string());
                drop(state);
                done.close();
                return Err(e);
            }
        };

        let pid = child.id();

        // A Stop racing in while the spawn syscall above was in flight cancels `ctx` before we
        // get here. Tear the freshly spawned child down immediately rather than let it run
        // unmonitored (§8: "Stop during Starting does not leave an orphan child").
        let stop_raced_in = ctx.is_cancelled() || self.inner.state.lock().unwrap().stop_requested;
        if stop_raced_in {
            let _ = process::kill_group(pid);
            let _ = child.wait();
            let mut state = self.inner.state.lock().unwrap();
            state.status = Status::Stopped;
            state.pid = 0;
            drop(state);
            self.inner.hooks.on_stop(None);
            done.close();
            return Ok(());
        }

        self.capture_output(&mut child);

        {
            let mut state = self.inner.state.lock().unwrap();
            state.status = Status::Running;
            state.pid = pid;
            state.start_time = Some(self.inner.clock.now());
        }
        tracing::info!(name = %self.inner.policy.name, pid, "child running");

        self.inner.hooks.on_start();

        let sup = self.clone();
        let handle = thread::spawn(move || sup.run_monitor(child, pid, ctx, done));
        *self.inner.monitor.lock().unwrap() = Some(handle);

        Ok(())
    }

    /// Idempotent (§4.1). No effect if not running. Otherwise: requests termination of the
    /// child's process group, waits up to `gracefulTimeout` for the monitor to close `done`,
    /// force-kills the group if it does not, then waits unconditionally.
    pub fn stop(&self) -> Result<(), SupervisorError> {
        let cycle = self.inner.cycle.lock().unwrap().clone();
        let Some(cycle) = cycle else {
            return Ok(());
        };

        self.inner.state.lock().unwrap().stop_requested = true;
        cycle.ctx.cancel().ok();

        let pid = self.inner.state.lock().unwrap().pid;
        if pid != 0 {
            if let Err(e) = process::terminate_group(pid) {
                tracing::warn!(pid, error = %e, "sending termination signal failed");
            }
        }

        if !cycle.done.wait_timeout(self.inner.policy.graceful_timeout) {
            let pid = self.inner.state.lock().unwrap().pid;
            if pid != 0 {
                if let Err(e) = process::kill_group(pid) {
                    cycle.done.wait();
                    self.join_monitor();
                    return Err(SupervisorError::StopFailed(e));
                }
            }
            cycle.done.wait();
        }

        self.join_monitor();
        self.inner.cycle.lock().unwrap().take();
        Ok(())
    }

    pub fn status(&self) -> Status {
        self.inner.state.lock().unwrap().status
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status(), Status::Running)
    }

    pub fn pid(&self) -> u32 {
        self.inner.state.lock().unwrap().pid
    }

    pub fn uptime(&self) -> Duration {
        let state = self.inner.state.lock().unwrap();
        state
            .start_time
            .map(|t| self.inner.clock.now().saturating_duration_since(t))
            .unwrap_or_default()
    }

    pub fn restart_count(&self) -> u32 {
        self.inner.backoff.lock().unwrap().restart_count()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().unwrap().last_error.clone()
    }

    /// An immutable, serializable snapshot of this supervisor's state (§6).
    pub fn stats(&self) -> Stats {
        let state = self.inner.state.lock().unwrap();
        Stats {
            name: self.inner.policy.name.clone(),
            status: state.status,
            pid: state.pid,
            uptime: state
                .start_time
                .map(|t| self.inner.clock.now().saturating_duration_since(t))
                .unwrap_or_default(),
            restart_count: self.inner.backoff.lock().unwrap().restart_count(),
            last_error: state.last_error.clone(),
        }
    }

    fn spawn_child(&self) -> Result<std::process::Child, SupervisorError> {
        let policy = &self.inner.policy;
        process::spawn_in_new_group(&policy.binary, &policy.args, &policy.env, policy.workdir.as_deref())
            .map_err(SupervisorError::SpawnFailed)
    }

    fn capture_output(&self, child: &mut std::process::Child) {
        if let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) {
            let logger = self.inner.logger.lock().unwrap().clone();
            process::spawn_readers(self.inner.policy.name.clone(), stdout, stderr, logger);
        }
    }

    fn join_monitor(&self) {
        if let Some(h) = self.inner.monitor.lock().unwrap().take() {
            let _ = h.join();
        }
    }

    /// Invoked by the watchdog for every probe failure, recoverable or not (§4.3, §4.4). A
    /// non-recoverable failure never touches `status` or the restart count (restart cannot cure
    /// hardware absence) but still needs to reach `lastError` so the surrounding controller can
    /// show it (§8 scenario 3: "lastError reflects hardware absence"). A recoverable L4 failure
    /// additionally triggers an immediate bus reset when `resetOnBusFailure` is set, without
    /// waiting for the 3-strike watchdog threshold (§4.5).
    fn on_probe_failure(&self, err: &ProbeError) {
        if !err.recoverable {
            self.inner.state.lock().unwrap().last_error = Some(err.to_string());
        }
        self.maybe_reset_on_bus_failure(err);
    }

    fn maybe_reset_on_bus_failure(&self, err: &ProbeError) {
        if err.layer != Layer::L4BusRoundTrip {
            return;
        }
        let (Some(identity), Some(resetter)) = (&self.inner.policy.usb, &self.inner.usb_resetter) else {
            return;
        };
        if identity.reset_on_bus_failure {
            let _ = resetter.reset_and_settle(identity, self.inner.clock.as_ref());
        }
    }

    fn maybe_reset_on_retry(&self) {
        let (Some(identity), Some(resetter)) = (&self.inner.policy.usb, &self.inner.usb_resetter) else {
            return;
        };
        if identity.reset_on_retry {
            let _ = resetter.reset_and_settle(identity, self.inner.clock.as_ref());
        }
    }

    fn finish_stopped(&self, done: &Done) {
        let mut state = self.inner.state.lock().unwrap();
        state.status = Status::Stopped;
        state.pid = 0;
        drop(state);
        self.inner.hooks.on_stop(None);
        tracing::info!(name = %self.inner.policy.name, "supervisor stopped");
        done.close();
    }

    fn fail_and_notify(&self, err: SupervisorError) {
        tracing::warn!(name = %self.inner.policy.name, error = %err, "child cycle ended unexpectedly");
        {
            let mut state = self.inner.state.lock().unwrap();
            state.status = Status::Failed;
            state.last_error = Some(err.to_string());
        }
        self.inner.hooks.on_stop(Some(&err));
    }

    /// The background task started by `start_with_context` (§4.1). Implements the monitor
    /// pseudocode: watch the child, decide whether to restart, apply backoff, respawn.
    fn run_monitor(&self, mut child: std::process::Child, mut pid: u32, ctx: Context, done: Done) {
        'cycle: loop {
            let mut probe = self.inner.probe_factory.as_ref().map(|f| f());
            let mut probe_failure_hook = |err: &ProbeError| self.on_probe_failure(err);

            let outcome = watchdog::wait_for_exit_or_health_failure(
                &mut child,
                pid,
                probe.as_deref_mut(),
                self.inner.policy.health_check_interval,
                self.inner.policy.probe_timeout,
                &ctx,
                Some(&mut probe_failure_hook),
            );
            drop(probe);

            let stop_requested = self.inner.state.lock().unwrap().stop_requested;

            match outcome {
                WatchdogExit::Cancelled => {
                    self.finish_stopped(&done);
                    return;
                }
                WatchdogExit::Exited(status) => {
                    if stop_requested {
                        self.finish_stopped(&done);
                        return;
                    }
                    self.fail_and_notify(SupervisorError::ChildExited(status));
                }
                WatchdogExit::Hung {
                    last_probe_error,
                    kill_result,
                    exited,
                } => {
                    if let Err(e) = &kill_result {
                        tracing::error!(pid, error = %e, "forced kill of hung child failed");
                    }
                    if let Some(status) = exited {
                        tracing::info!(pid, ?status, "hung child reaped after forced kill");
                    }
                    let kill_outcome = match kill_result {
                        Ok(()) => KillOutcome::Killed,
                        Err(e) => KillOutcome::Failed(e),
                    };
                    self.fail_and_notify(SupervisorError::HungKilled {
                        failure_count: watchdog::HUNG_KILL_THRESHOLD,
                        last_probe_error,
                        kill_outcome,
                    });
                }
            }

            if !self.inner.policy.restart_on_failure {
                done.close();
                return;
            }

            // Respawn loop: keep retrying spawn failures with fresh backoff until one succeeds,
            // the attempt budget is exhausted, or a shutdown is requested (§4.1 pseudocode:
            // "spawn again (errors logged, loop continues)").
            let mut uptime_for_backoff = self
                .inner
                .state
                .lock()
                .unwrap()
                .start_time
                .map(|t| self.inner.clock.now().saturating_duration_since(t))
                .unwrap_or_default();

            loop {
                let (attempt, delay) = {
                    let mut backoff = self.inner.backoff.lock().unwrap();
                    let delay = backoff.record_failure(uptime_for_backoff);
                    (backoff.restart_count(), delay)
                };

                if self.inner.policy.max_restart_attempts > 0 && attempt > self.inner.policy.max_restart_attempts {
                    tracing::error!(name = %self.inner.policy.name, attempt, "giving up after max restart attempts");
                    done.close();
                    return;
                }

                self.maybe_reset_on_retry();
                self.inner.hooks.on_restart(attempt);

                if ctx.wait_timeout(delay) {
                    self.finish_stopped(&done);
                    return;
                }
                if self.inner.state.lock().unwrap().stop_requested {
                    self.finish_stopped(&done);
                    return;
                }

                match self.spawn_child() {
                    Ok(mut new_child) => {
                        pid = new_child.id();
                        self.capture_output(&mut new_child);
                        {
                            let mut state = self.inner.state.lock().unwrap();
                            state.status = Status::Running;
                            state.pid = pid;
                            state.start_time = Some(self.inner.clock.now());
                            state.last_error = None;
                        }
                        tracing::info!(name = %self.inner.policy.name, pid, attempt, "child respawned");
                        self.inner.hooks.on_start();
                        child = new_child;
                        continue 'cycle;
                    }
                    Err(e) => {
                        tracing::error!(name = %self.inner.policy.name, error = %e, "respawn failed, retrying after backoff");
                        self.inner.state.lock().unwrap().last_error = Some(e.to_string());
                        uptime_for_backoff = Duration::ZERO;
                        continue;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{HealthProbe, ProbeError};
    use crate::hooks::ClosureHooks;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(name: &str, binary: &str, args: &[&str]) -> SupervisorPolicy {
        let mut p = SupervisorPolicy::new(name, binary);
        p.args = args.iter().map(|s| s.to_string()).collect();
        p.restart_delay = Duration::from_millis(20);
        p.max_restart_delay = Duration::from_millis(200);
        p.stable_threshold = Duration::from_secs(600);
        p.health_check_interval = Duration::from_millis(20);
        p.probe_timeout = Duration::from_millis(200);
        p.graceful_timeout = Duration::from_millis(500);
        p
    }

    #[test]
    fn start_transitions_to_running_and_stop_to_stopped() {
        let sup = Supervisor::new(policy("sleeper", "sh", &["-c", "sleep 5"]));
        sup.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(sup.is_running());
        assert!(sup.pid() > 0);

        sup.stop().unwrap();
        assert_eq!(sup.status(), Status::Stopped);
        assert_eq!(sup.pid(), 0);
    }

    #[test]
    fn start_while_running_returns_already_running() {
        let sup = Supervisor::new(policy("sleeper", "sh", &["-c", "sleep 5"]));
        sup.start().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let err = sup.start().unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRunning));
        sup.stop().unwrap();
    }

    #[test]
    fn stop_before_start_is_a_no_op_success() {
        let sup = Supervisor::new(policy("never-started", "sh", &["-c", "true"]));
        assert!(sup.stop().is_ok());
    }

    #[test]
    fn spawn_failure_surfaces_spawn_failed_and_marks_failed() {
        let sup = Supervisor::new(policy("missing", "definitely-not-a-real-binary-xyz", &[]));
        let err = sup.start().unwrap_err();
        assert!(matches!(err, SupervisorError::SpawnFailed(_)));
        assert_eq!(sup.status(), Status::Failed);
    }

    #[test]
    fn unexpected_exit_triggers_restart_with_incrementing_count() {
        let sup = Supervisor::new(policy("flaky", "sh", &["-c", "exit 1"]));
        sup.start().unwrap();

        // wait through a couple of restart cycles
        for _ in 0..40 {
            if sup.restart_count() >= 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(sup.restart_count() >= 2);
        sup.stop().unwrap();
    }

    #[test]
    fn restart_on_failure_false_does_not_respawn() {
        let mut p = policy("one-shot", "sh", &["-c", "exit 1"]);
        p.restart_on_failure = false;
        let sup = Supervisor::new(p);
        sup.start().unwrap();

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(sup.status(), Status::Failed);
        assert_eq!(sup.restart_count(), 0);
    }

    #[test]
    fn max_restart_attempts_gives_up() {
        let mut p = policy("doomed", "sh", &["-c", "exit 1"]);
        p.max_restart_attempts = 2;
        let sup = Supervisor::new(p);
        sup.start().unwrap();

        std::thread::sleep(Duration::from_millis(500));
        // record_failure increments before the attempt-count check (§4.1 pseudocode), so the
        // counter reaches 3 (not 2) at the moment the give-up check trips: attempts 1 and 2
        // respawn, attempt 3 exceeds max_restart_attempts and the supervisor gives up.
        assert_eq!(sup.restart_count(), 3);
        assert_eq!(sup.status(), Status::Failed);
    }

    #[test]
    fn hooks_fire_on_start_stop_restart() {
        let starts = Arc::new(AtomicU32::new(0));
        let stops = Arc::new(AtomicU32::new(0));
        let restarts = Arc::new(AtomicU32::new(0));

        let (s2, st2, r2) = (starts.clone(), stops.clone(), restarts.clone());
        let hooks = Arc::new(ClosureHooks {
            on_start: move || {
                s2.fetch_add(1, Ordering::SeqCst);
            },
            on_stop: move |_err: Option<&SupervisorError>| {
                st2.fetch_add(1, Ordering::SeqCst);
            },
            on_restart: move |_attempt: u32| {
                r2.fetch_add(1, Ordering::SeqCst);
            },
        });

        let sup = Supervisor::with_hooks(policy("hooked", "sh", &["-c", "exit 1"]), hooks);
        sup.start().unwrap();

        for _ in 0..40 {
            if restarts.load(Ordering::SeqCst) >= 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        assert!(starts.load(Ordering::SeqCst) >= 2);
        assert!(restarts.load(Ordering::SeqCst) >= 1);
        sup.stop().unwrap();
        assert!(stops.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn graceful_stop_sends_no_forced_kill_when_child_exits_promptly() {
        // `sh -c 'trap exit 0 TERM; sleep 5'` exits cleanly on SIGTERM well within
        // `graceful_timeout`.
        let sup = Supervisor::new(policy(
            "graceful",
            "sh",
            &["-c", "trap 'exit 0' TERM; sleep 5 & wait"],
        ));
        sup.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(sup.stop().is_ok());
        assert_eq!(sup.status(), Status::Stopped);
    }

    #[test]
    fn forced_kill_path_when_child_ignores_termination() {
        let mut p = policy("stubborn", "sh", &["-c", "trap '' TERM; sleep 5"]);
        p.graceful_timeout = Duration::from_millis(100);
        let sup = Supervisor::new(p);
        sup.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(sup.stop().is_ok());
        assert_eq!(sup.status(), Status::Stopped);
    }

    struct FlakyThenHealthy {
        calls: Arc<AtomicU32>,
    }

    impl HealthProbe for FlakyThenHealthy {
        fn check(&mut self, _pid: u32, _timeout: Duration) -> Result<(), ProbeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < 3 {
                Err(ProbeError {
                    layer: Layer::L2Transport,
                    recoverable: true,
                    message: "unreachable".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn hung_child_is_killed_after_three_consecutive_probe_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let factory_calls = calls.clone();

        let sup = Supervisor::new(policy("hangy", "sh", &["-c", "sleep 30"]))
            .with_health_probe_factory(Arc::new(move || {
                Box::new(FlakyThenHealthy {
                    calls: factory_calls.clone(),
                }) as Box<dyn HealthProbe>
            }));

        sup.start().unwrap();

        for _ in 0..100 {
            if !sup.is_running() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        assert_eq!(sup.status(), Status::Failed);
        assert!(sup.last_error().unwrap().contains("hung"));
        sup.stop().unwrap();
    }

    struct AlwaysMissingDevice;
    impl HealthProbe for AlwaysMissingDevice {
        fn check(&mut self, _pid: u32, _timeout: Duration) -> Result<(), ProbeError> {
            Err(ProbeError {
                layer: Layer::L0DevicePresence,
                recoverable: false,
                message: "usb device 1234:5678 not enumerated".to_string(),
            })
        }
    }

    #[test]
    fn non_recoverable_probe_failure_surfaces_last_error_without_restarting() {
        let sup = Supervisor::new(policy("dongle-less", "sh", &["-c", "sleep 5"]))
            .with_health_probe_factory(Arc::new(|| Box::new(AlwaysMissingDevice) as Box<dyn HealthProbe>));

        sup.start().unwrap();
        std::thread::sleep(Duration::from_millis(150));

        // restart cannot cure hardware absence: the child keeps running untouched.
        assert!(sup.is_running());
        assert_eq!(sup.restart_count(), 0);
        assert!(sup
            .last_error()
            .map(|e| e.contains("not enumerated"))
            .unwrap_or(false));

        sup.stop().unwrap();
    }
}
