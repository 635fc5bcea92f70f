use std::time::{Duration, Instant};

/// An injected monotonic time source (§9 Design Notes: "the clock is injected"). Production
/// code uses [`SystemClock`]; tests substitute a [`FakeClock`] to assert backoff and stability
/// timing without real sleeps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, dur: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, dur: Duration) {
        std::thread::sleep(dur)
    }
}
