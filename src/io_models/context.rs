use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Cooperative cancellation handle shared by every operation of one engine
/// invocation. Cheap to clone; cancelling is observed at the next suspension
/// point (process poll, readiness tick, retry sleep).
#[derive(Clone, Debug, Default)]
pub struct AbortHandle {
    cancel_requested: Arc<AtomicBool>,
    parent: Option<Box<AbortHandle>>,
}

impl AbortHandle {
    pub fn new() -> Self {
        AbortHandle {
            cancel_requested: Arc::new(AtomicBool::new(false)),
            parent: None,
        }
    }

    /// Derived handle: cancelled when either itself or any ancestor is
    /// cancelled. Cancelling the child leaves the parent untouched, which is
    /// how a failing task group kills its siblings without aborting the whole
    /// invocation.
    pub fn new_child(&self) -> Self {
        AbortHandle {
            cancel_requested: Arc::new(AtomicBool::new(false)),
            parent: Some(Box::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    pub fn is_cancel_requested(&self) -> bool {
        if self.cancel_requested.load(Ordering::Acquire) {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.is_cancel_requested())
    }
}

/// Context: request-scoped data of one engine invocation. Owns the abort
/// handle every component polls at its suspension points.
#[derive(Clone, Debug)]
pub struct Context {
    execution_id: String,
    abort_handle: AbortHandle,
    /// When set, the UI adapter renders per-stage timing.
    timing: bool,
}

impl Context {
    pub fn new(execution_id: String, timing: bool) -> Self {
        Context {
            execution_id,
            abort_handle: AbortHandle::new(),
            timing,
        }
    }

    pub fn new_random(timing: bool) -> Self {
        Context::new(Uuid::new_v4().to_string(), timing)
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.abort_handle.is_cancel_requested()
    }

    pub fn timing_enabled(&self) -> bool {
        self.timing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_handle_is_shared_across_clones() {
        // setup:
        let ctx = Context::new_random(false);
        let handle = ctx.abort_handle();

        // execute:
        handle.cancel();

        // verify:
        assert!(ctx.is_cancel_requested());
    }

    #[test]
    fn test_child_handle_observes_parent_but_not_vice_versa() {
        // setup:
        let parent = AbortHandle::new();
        let child = parent.new_child();

        // execute & verify: child cancel stays local
        child.cancel();
        assert!(child.is_cancel_requested());
        assert!(!parent.is_cancel_requested());

        // parent cancel propagates to a fresh child
        let other_child = parent.new_child();
        parent.cancel();
        assert!(other_child.is_cancel_requested());
    }
}
