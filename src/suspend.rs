//! Suspend coordination for host-mutating calls.
//!
//! The coordinator is shared by the listener and every connection. It holds
//! two pieces of state:
//!
//! - a one-way "blocked" switch: once [`block_all`] runs, no new connection
//!   is served and every live connection drops at its next frame;
//! - a suspend lock: at most one owner holds it at a time, across all
//!   connections. An owner may take it repeatedly (a client's explicit
//!   `CoreSuspend` window followed by suspending calls on the same
//!   connection) and must release it as many times.
//!
//! Waiting for the lock blocks the calling thread, so it is only taken from
//! handler code, which the server runs on tokio's blocking pool.
//!
//! [`block_all`]: SuspendCoordinator::block_all

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Identity of a suspend-lock holder (one per connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

#[derive(Debug, Default)]
struct SuspendState {
    owner: Option<OwnerId>,
    depth: usize,
}

/// Process-wide coordinator, passed around as `Arc<SuspendCoordinator>`.
#[derive(Debug, Default)]
pub struct SuspendCoordinator {
    blocked: AtomicBool,
    state: Mutex<SuspendState>,
    released: Condvar,
    next_owner: AtomicU64,
}

impl SuspendCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh owner identity.
    pub fn register_owner(&self) -> OwnerId {
        OwnerId(self.next_owner.fetch_add(1, Ordering::Relaxed))
    }

    /// Refuse all new and in-flight work from now on. There is no undo.
    pub fn block_all(&self) {
        if !self.blocked.swap(true, Ordering::SeqCst) {
            tracing::info!("Remote server blocked, dropping all connections");
        }
    }

    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Take the suspend lock for `owner`, waiting while another owner holds it.
    pub fn acquire(&self, owner: OwnerId) {
        let mut state = self.lock_state();
        while matches!(state.owner, Some(current) if current != owner) {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.owner = Some(owner);
        state.depth += 1;
    }

    /// Release one level held by `owner`.
    ///
    /// Returns `false` if `owner` does not hold the lock.
    pub fn release(&self, owner: OwnerId) -> bool {
        let mut state = self.lock_state();
        if state.owner != Some(owner) || state.depth == 0 {
            return false;
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.released.notify_all();
        }
        true
    }

    /// Release `depth` levels held by `owner` at once.
    pub fn release_many(&self, owner: OwnerId, depth: usize) {
        for _ in 0..depth {
            if !self.release(owner) {
                break;
            }
        }
    }

    /// Scoped acquisition, released on drop.
    pub fn suspend(&self, owner: OwnerId) -> SuspendGuard<'_> {
        self.acquire(owner);
        SuspendGuard {
            coordinator: self,
            owner,
        }
    }

    /// Current holder of the suspend lock.
    pub fn holder(&self) -> Option<OwnerId> {
        self.lock_state().owner
    }

    fn lock_state(&self) -> MutexGuard<'_, SuspendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds the suspend lock until dropped.
#[must_use = "the suspend lock is released when the guard is dropped"]
#[derive(Debug)]
pub struct SuspendGuard<'a> {
    coordinator: &'a SuspendCoordinator,
    owner: OwnerId,
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.release(self.owner);
    }
}
