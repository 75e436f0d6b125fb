//! Per-call identity scope.
//!
//! A [`CallScope`] is the execution slot an invocation runs in. The identity
//! service binds the authenticated [`IdentityContext`] into it; the dispatch
//! pipeline holds a [`ScopeGuard`] for the whole invocation, and dropping the
//! guard clears the slot on every exit path, including unwinding and
//! cancellation of the in-flight future.

use std::sync::Arc;

use docvault_core::IdentityContext;
use parking_lot::RwLock;

/// Slot holding the identity of the call currently running in it.
#[derive(Debug, Default)]
pub struct CallScope {
    identity: RwLock<Option<IdentityContext>>,
}

impl CallScope {
    /// Creates an empty, shareable scope.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Identity bound to the current call, if any.
    #[must_use]
    pub fn identity(&self) -> Option<IdentityContext> {
        self.identity.read().clone()
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.identity.read().is_some()
    }

    /// Only the identity service binds a scope.
    pub(crate) fn bind(&self, identity: IdentityContext) {
        *self.identity.write() = Some(identity);
    }

    fn clear(&self) {
        self.identity.write().take();
    }

    /// Returns a guard that clears this scope when dropped.
    #[must_use]
    pub fn guard(self: &Arc<Self>) -> ScopeGuard {
        ScopeGuard {
            scope: Arc::clone(self),
        }
    }
}

/// Clears its [`CallScope`] on drop.
#[derive(Debug)]
pub struct ScopeGuard {
    scope: Arc<CallScope>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.scope.clear();
    }
}
