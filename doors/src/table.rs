//! The process-wide table of live doors.
//!
//! Lookups take a read lock; install/remove take a write lock. The table's
//! own map entry is an `Arc<DoorState>` clone that exists purely for Rust
//! ownership — it is never counted in `DoorState::refcount` (see
//! `state.rs`).

use crate::error::Error;
use crate::id::DoorId;
use crate::state::DoorState;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

/// Doors are installed in batches of this size as the table grows, mirroring
/// the lazy-growth behavior of the fixed-size table this runtime replaces.
const GROWTH_INCREMENT: usize = 1024;

pub struct DoorTable {
    inner: RwLock<HashMap<DoorId, Arc<DoorState>>>,
    limit: RwLock<usize>,
}

/// An exclusive hold on the table, taken by the pre-fork hook (`fork.rs`)
/// and released in the post-fork parent hook, or consumed to empty the
/// table in the post-fork child hook. Holding the write lock across the
/// `fork()` call is what makes the table lock "the table lock protects
/// reshape" guarantee in §3 extend across a fork, not just within one
/// process's lifetime.
pub struct ForkGuard(RwLockWriteGuard<'static, HashMap<DoorId, Arc<DoorState>>>);

impl ForkGuard {
    /// Consume the guard, removing every table entry. Used only in the
    /// post-fork child, where none of the threads that held a standing
    /// reference on these doors (the accept loop, any dispatcher) survived
    /// the fork; their references are simply gone; see
    /// [`DoorState::force_clear_for_fork_child`].
    pub fn drain(mut self) -> Vec<Arc<DoorState>> {
        self.0.drain().map(|(_, v)| v).collect()
    }
}

impl DoorTable {
    pub fn new() -> Self {
        let initial = GROWTH_INCREMENT.min(Self::os_limit());
        Self {
            inner: RwLock::new(HashMap::new()),
            limit: RwLock::new(initial),
        }
    }

    pub fn install(&self, state: Arc<DoorState>) -> Result<(), Error> {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if map.len() >= *self.limit.read().unwrap_or_else(|e| e.into_inner()) {
            self.grow();
        }
        if map.len() >= Self::os_limit() {
            return Err(Error::NoMemory);
        }
        map.insert(state.id, state);
        Ok(())
    }

    /// Grow the table's capacity by one increment, but never past the OS
    /// per-process open-file limit (§3: "never beyond the OS limit").
    fn grow(&self) {
        let mut limit = self.limit.write().unwrap_or_else(|e| e.into_inner());
        *limit = (*limit + GROWTH_INCREMENT).min(Self::os_limit());
    }

    /// The OS per-process open-file limit, queried via `sysconf(_SC_OPEN_MAX)`
    /// the way `original_source/door.c` (lines 341, 393) does, rather than a
    /// hardcoded ceiling. Falls back to the initial growth increment if the
    /// host can't report a limit (`sysconf` returning `-1`).
    fn os_limit() -> usize {
        let max = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
        if max > 0 {
            max as usize
        } else {
            GROWTH_INCREMENT
        }
    }

    pub fn lookup(&self, id: DoorId) -> Option<Arc<DoorState>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Remove the table's own reference to this door (used by `revoke`).
    /// Dropping the returned `Arc` is the caller's responsibility.
    pub fn take(&self, id: DoorId) -> Option<Arc<DoorState>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner()).remove(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Acquire the table's write lock for the duration of a fork. Requires a
    /// `'static` borrow because the guard must survive from the pre-fork
    /// hook to whichever of the post-fork hooks runs next, and those are
    /// separate `extern "C"` callback invocations with no shared stack frame
    /// to hold it in.
    pub fn lock_for_fork(&'static self) -> ForkGuard {
        ForkGuard(self.inner.write().unwrap_or_else(|e| e.into_inner()))
    }

    /// Reset the growth ceiling to its initial value. Called once the table
    /// has been drained in the post-fork child, so a freshly re-created
    /// process-in-miniature starts exactly where a brand new process would.
    pub fn reset_limit(&self) {
        *self.limit.write().unwrap_or_else(|e| e.into_inner()) = GROWTH_INCREMENT.min(Self::os_limit());
    }
}

impl Default for DoorTable {
    fn default() -> Self {
        Self::new()
    }
}
