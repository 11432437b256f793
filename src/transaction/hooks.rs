//! Transaction hooks for tests.
//!
//! A hook pair runs around exactly one `run_transaction` call: `before`
//! just ahead of the commit, `after` just after it. Hooks are consumed in
//! order, one per transaction. While a hook pair is in use the queue is
//! empty, so transactions run from inside a hook are not hooked.

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tracing::warn;

pub type HookFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Default)]
pub struct TestHook {
    pub before: Option<HookFn>,
    pub after: Option<HookFn>,
}

impl TestHook {
    pub fn before<F>(f: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        Self {
            before: Some(Box::new(f)),
            after: None,
        }
    }

    pub fn after<F>(f: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        Self {
            before: None,
            after: Some(Box::new(f)),
        }
    }

    /// A hook that does nothing but still uses up one transaction.
    pub fn noop() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for TestHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHook")
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

/// Queue of pending hooks shared by a runner and its checkers.
#[derive(Clone, Default)]
pub struct HookQueue {
    hooks: Arc<Mutex<Vec<TestHook>>>,
}

impl HookQueue {
    pub fn set(&self, hooks: Vec<TestHook>) -> HookChecker {
        match self.hooks.lock() {
            Ok(mut guard) => *guard = hooks,
            Err(poisoned) => *poisoned.into_inner() = hooks,
        }
        HookChecker {
            queue: self.clone(),
        }
    }

    pub fn remaining(&self) -> usize {
        match self.hooks.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Takes the whole queue, leaving it empty.
    pub(crate) fn take(&self) -> Vec<TestHook> {
        match self.hooks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Puts back the hooks not yet consumed.
    pub(crate) fn restore(&self, rest: Vec<TestHook>) {
        let mut guard = match self.hooks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !guard.is_empty() {
            warn!("transaction hooks replaced while a hook was running");
            return;
        }
        *guard = rest;
    }
}

/// Returned when hooks are installed; verifies they were all used.
pub struct HookChecker {
    queue: HookQueue,
}

impl HookChecker {
    pub fn remaining(&self) -> usize {
        self.queue.remaining()
    }

    /// Panics if any installed hook was not consumed.
    pub fn check(&self) {
        let remaining = self.remaining();
        assert_eq!(remaining, 0, "{remaining} transaction hooks were not run");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_and_restore() {
        let queue = HookQueue::default();
        let checker = queue.set(vec![TestHook::noop(), TestHook::noop()]);
        let mut hooks = queue.take();
        assert_eq!(queue.remaining(), 0);
        hooks.remove(0);
        queue.restore(hooks);
        assert_eq!(checker.remaining(), 1);
    }
}
