//! Cancellation of blocked store readers
//!
//! Threads blocked in the store sleep on a per-key condition variable and
//! cannot be interrupted directly. A [`CancellationToken`] keeps a list of
//! the slots its waiters sleep on; `cancel()` raises the flag and then wakes
//! each of those slots so the waiters observe it.
//!
//! Lock order: a waiter registers while holding its slot lock, so the
//! canceller snapshots the registrations first and only then takes slot
//! locks, never both at once.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Something a cancelled waiter may be sleeping on
pub(crate) trait Wakeable: Send + Sync {
    /// Wake every thread sleeping on this object
    fn wake_all(&self);
}

struct TokenInner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    waiters: Mutex<Vec<(u64, Weak<dyn Wakeable>)>>,
}

/// Cloneable signal that makes blocked `get` calls return `Cancelled`
///
/// Cancelling affects only the callers that waited with this token; the
/// entries they waited on and every other waiter are untouched.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                waiters: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Cancel and wake every waiter currently using this token
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let targets: Vec<Arc<dyn Wakeable>> = {
            let waiters = self.inner.waiters.lock();
            waiters.iter().filter_map(|(_, w)| w.upgrade()).collect()
        };
        tracing::debug!(waiters = targets.len(), "Cancelling blocked store readers");
        for target in targets {
            target.wake_all();
        }
    }

    /// Whether `cancel` has been called
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Register a slot a waiter is about to sleep on
    ///
    /// Must be called with the slot lock held; the returned guard
    /// unregisters on drop.
    pub(crate) fn register(&self, target: Weak<dyn Wakeable>) -> Registration<'_> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.waiters.lock().push((id, target));
        Registration { token: self, id }
    }

    #[cfg(test)]
    fn registered(&self) -> usize {
        self.inner.waiters.lock().len()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Live registration of one waiter with a token
pub(crate) struct Registration<'a> {
    token: &'a CancellationToken,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut waiters = self.token.inner.waiters.lock();
        waiters.retain(|(id, _)| *id != self.id);
    }
}
