use std::time::Duration;

/// Computes the delay before the `attempt`-th restart (§4.2).
///
/// `attempt <= 1` returns `restart_delay` unchanged; otherwise the delay doubles per attempt,
/// saturating rather than overflowing, and is clamped to `max_restart_delay`.
pub fn compute_backoff(attempt: u32, restart_delay: Duration, max_restart_delay: Duration) -> Duration {
    if attempt <= 1 {
        return restart_delay.min(max_restart_delay);
    }
    let exponent = attempt - 1;
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    restart_delay
        .checked_mul(factor)
        .unwrap_or(max_restart_delay)
        .min(max_restart_delay)
}

/// Tracks `restartCount` across a supervisor's lifetime, applying the stability reset rule
/// (§3 invariant 5, §4.2): the count resets to zero when the prior cycle's uptime met the
/// stability threshold, or on a fresh Start after an explicit Stop.
#[derive(Debug, Clone)]
pub struct Backoff {
    restart_count: u32,
    restart_delay: Duration,
    max_restart_delay: Duration,
    stable_threshold: Duration,
}

impl Backoff {
    pub fn new(restart_delay: Duration, max_restart_delay: Duration, stable_threshold: Duration) -> Self {
        let restart_delay = if restart_delay > max_restart_delay {
            tracing::warn!(
                ?restart_delay,
                ?max_restart_delay,
                "restart_delay exceeds max_restart_delay, clamping"
            );
            max_restart_delay
        } else {
            restart_delay
        };

        Self {
            restart_count: 0,
            restart_delay,
            max_restart_delay,
            stable_threshold,
        }
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// Resets the counter to zero, for a fresh Start after Stop.
    pub fn reset(&mut self) {
        self.restart_count = 0;
    }

    /// Records a failed cycle that ran for `uptime`, returning the delay to wait before
    /// respawning. Applies the stability reset before incrementing, per invariant 5.
    pub fn record_failure(&mut self, uptime: Duration) -> Duration {
        if uptime >= self.stable_threshold {
            self.restart_count = 0;
        }
        self.restart_count += 1;
        compute_backoff(self.restart_count, self.restart_delay, self.max_restart_delay)
    }
}
