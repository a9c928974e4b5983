//! Fork coordination (C9).
//!
//! `fork()` only duplicates the calling thread; every other thread,
//! including every accept-loop and dispatcher thread owned by this runtime,
//! simply ceases to exist in the child. Left alone, the child would inherit
//! a door table whose entries look live (non-zero refcounts, open listening
//! descriptors) but whose owning threads are gone -- a half-initialized
//! structure and a set of zombie descriptors the child never asked to
//! serve. Registering `pthread_atfork` hooks (matching
//! `original_source/door_server.c`'s own atfork registration) lets the
//! runtime quiesce the table across the fork and empty it in the child.
//!
//! The three phases, per §4.8:
//!   - **Pre-fork**: acquire the table lock exclusively (`ForkGuard`), so no
//!     other thread in the parent can be mid-reshape when `fork()` copies
//!     the process image.
//!   - **Post-fork parent**: release it; nothing else changes for the
//!     parent.
//!   - **Post-fork child**: drain the table, force-clear each door's
//!     bookkeeping (closing its listening socket) and free the table back
//!     to its pre-initialized shape, then release the lock.
//!
//! The `ForkGuard` is a genuine `RwLockWriteGuard`, but it cannot be held as
//! a live Rust value across the `fork()` call itself -- `prepare`, `parent`
//! and `child` are three separate `extern "C"` callbacks with no shared
//! stack frame. It is stashed in a process-wide `Mutex<Option<ForkGuard>>`
//! instead; a raw `pthread_mutex_t` additionally serializes the whole
//! three-phase sequence, since a second concurrent `fork()` racing the first
//! would otherwise see `FORK_GUARD` in whatever state the first sequence
//! left it.

use crate::table::ForkGuard;
use std::sync::{Mutex, OnceLock};

static mut FORK_MUTEX: libc::pthread_mutex_t = libc::PTHREAD_MUTEX_INITIALIZER;
static HOOKS_INSTALLED: OnceLock<()> = OnceLock::new();
static FORK_GUARD: Mutex<Option<ForkGuard>> = Mutex::new(None);

extern "C" fn prepare() {
    unsafe { libc::pthread_mutex_lock(std::ptr::addr_of_mut!(FORK_MUTEX)) };
    if let Some(rt) = crate::runtime::get() {
        *FORK_GUARD.lock().unwrap_or_else(|e| e.into_inner()) = Some(rt.table.lock_for_fork());
    }
}

extern "C" fn parent() {
    *FORK_GUARD.lock().unwrap_or_else(|e| e.into_inner()) = None;
    unsafe { libc::pthread_mutex_unlock(std::ptr::addr_of_mut!(FORK_MUTEX)) };
}

extern "C" fn child() {
    let guard = FORK_GUARD.lock().unwrap_or_else(|e| e.into_inner()).take();
    if let Some(guard) = guard {
        let doors = guard.drain();
        let n = doors.len();
        for state in &doors {
            state.force_clear_for_fork_child();
        }
        drop(doors);
        if let Some(rt) = crate::runtime::get() {
            rt.table.reset_limit();
        }
        if n > 0 {
            log::warn!("door runtime reset after fork: {n} door(s) did not survive into the child");
        }
    }
    unsafe { libc::pthread_mutex_unlock(std::ptr::addr_of_mut!(FORK_MUTEX)) };
}

pub fn install_hooks_once() {
    HOOKS_INSTALLED.get_or_init(|| unsafe {
        libc::pthread_atfork(Some(prepare), Some(parent), Some(child));
    });
}
