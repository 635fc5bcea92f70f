use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// A cloneable cancellation signal shared between the caller of `Start` and every task
/// spawned for that cycle.
///
/// Cancelling is sticky: once cancelled, every existing or future clone observes it.
#[derive(Debug, Clone, Default)]
pub struct Context(Arc<(Mutex<bool>, Condvar)>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the context cancelled and wakes every waiter.
    pub fn cancel(&self) -> Result<(), PoisonError<MutexGuard<'_, bool>>> {
        let (lock, cvar) = &*self.0;
        *lock.lock()? = true;
        cvar.notify_all();
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.0;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until cancelled.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.0;
        let mut cancelled = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            cancelled = cvar.wait(cancelled).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until cancelled or `timeout` elapses, returning whether cancellation occurred.
    pub fn wait_timeout(&self, timeout: std::time::Duration) -> bool {
        let (lock, cvar) = &*self.0;
        let cancelled = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if *cancelled {
            return true;
        }
        let (cancelled, result) = cvar
            .wait_timeout(cancelled, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled || !result.timed_out()
    }
}

/// A single-shot completion signal, closed exactly once. This backs the `done` channel from
/// the data model: the monitor task closes it from its one exit point, and `Stop` blocks on
/// it without risking a double-close panic.
#[derive(Debug, Clone, Default)]
pub struct Done(Arc<(Mutex<bool>, Condvar)>);

impl Done {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes the signal. Idempotent: the second and later calls are no-ops.
    pub fn close(&self) {
        let (lock, cvar) = &*self.0;
        let mut closed = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !*closed {
            *closed = true;
            cvar.notify_all();
        }
    }

    pub fn is_closed(&self) -> bool {
        let (lock, _) = &*self.0;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until closed.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.0;
        let mut closed = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*closed {
            closed = cvar.wait(closed).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until closed or `timeout` elapses, returning whether it is closed.
    pub fn wait_timeout(&self, timeout: std::time::Duration) -> bool {
        let (lock, cvar) = &*self.0;
        let closed = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return true;
        }
        let (closed, result) = cvar
            .wait_timeout(closed, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        *closed || !result.timed_out()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn context_starts_uncancelled() {
        let ctx = Context::new();
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn context_cancel_wakes_waiters() {
        let ctx = Context::new();
        let waiter = ctx.clone();
        let handle = thread::spawn(move || waiter.wait());

        thread::sleep(Duration::from_millis(20));
        ctx.cancel().unwrap();
        handle.join().unwrap();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn context_wait_timeout_returns_false_when_not_cancelled() {
        let ctx = Context::new();
        assert!(!ctx.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn done_close_is_idempotent() {
        let done = Done::new();
        done.close();
        done.close();
        assert!(done.is_closed());
    }

    #[test]
    fn done_wait_unblocks_once_closed_from_other_thread() {
        let done = Done::new();
        let closer = done.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });

        done.wait();
        handle.join().unwrap();
        assert!(done.is_closed());
    }
}
