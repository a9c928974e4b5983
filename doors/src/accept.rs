//! The accept loop: one background thread per attached door, handing each
//! accepted connection to its own dispatcher thread.

use crate::sock::LocalSocket;
use crate::state::DoorState;
use std::io;
use std::sync::Arc;
use std::thread;

/// Spawn the background thread that owns a door's listening socket for its
/// entire lifetime. Establishes the standing self-reference that makes
/// `refcount == 1` mean "no dispatcher is active and nobody else holds this
/// door", which the unreferenced-invocation policy in `DoorState::release`
/// depends on.
pub fn spawn(state: Arc<DoorState>) {
    thread::spawn(move || run(state));
}

fn run(state: Arc<DoorState>) {
    state.acquire();
    state.wait_for_attached_or_revoked();

    if state.is_revoked() {
        state.release();
        return;
    }

    let listener = state
        .listener
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
        .expect("accept loop woke with neither revoked nor attached");

    log::debug!("accept loop started for door {:?}", state.id);

    loop {
        if state.is_revoked() {
            break;
        }
        match listener.accept() {
            Ok(conn) => {
                // One reference per accepted connection, for as long as the
                // dispatcher (and, after a door_call, the worker it hands
                // off to) keeps the connection open.
                state.acquire();
                let conn_state = state.clone();
                if thread::Builder::new().spawn(move || crate::dispatch::run(conn_state, conn)).is_err() {
                    log::error!("failed to spawn dispatcher for door {:?}", state.id);
                    state.release();
                }
            }
            Err(e) if is_transient(&e) => {
                log::warn!("transient accept failure on door {:?}: {e}", state.id);
                continue;
            }
            Err(e) => {
                log::error!("fatal accept failure on door {:?}: {e}", state.id);
                break;
            }
        }
    }

    log::debug!("accept loop exiting for door {:?}", state.id);
    state.release();
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EINTR) | Some(libc::ECONNABORTED) | Some(libc::EMFILE) | Some(libc::ENFILE)
    )
}
