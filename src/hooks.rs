/// Observer hooks consumed by the rest of the controller (§6). Invoked synchronously from the
/// monitor task; implementers must not block long. Default methods are no-ops so a caller that
/// only cares about one transition doesn't have to implement the other two.
pub trait SupervisorHooks: Send + Sync {
    fn on_start(&self) {}
    fn on_stop(&self, _err: Option<&crate::error::SupervisorError>) {}
    fn on_restart(&self, _attempt: u32) {}
}

/// A no-op implementation, used as the default when no hooks are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl SupervisorHooks for NoopHooks {}

/// Adapts three plain closures to [`SupervisorHooks`], for callers who would rather not define
/// a type for a handful of callbacks.
pub struct ClosureHooks<F1, F2, F3>
where
    F1: Fn() + Send + Sync,
    F2: Fn(Option<&crate::error::SupervisorError>) + Send + Sync,
    F3: Fn(u32) + Send + Sync,
{
    pub on_start: F1,
    pub on_stop: F2,
    pub on_restart: F3,
}

impl<F1, F2, F3> SupervisorHooks for ClosureHooks<F1, F2, F3>
where
    F1: Fn() + Send + Sync,
    F2: Fn(Option<&crate::error::SupervisorError>) + Send + Sync,
    F3: Fn(u32) + Send + Sync,
{
    fn on_start(&self) {
        (self.on_start)()
    }

    fn on_stop(&self, err: Option<&crate::error::SupervisorError>) {
        (self.on_stop)(err)
    }

    fn on_restart(&self, attempt: u32) {
        (self.on_restart)(attempt)
    }
}
