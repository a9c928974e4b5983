//! Server-procedure invocation.
//!
//! Per §4.6, the per-connection dispatcher (`dispatch.rs`) never calls the
//! server procedure itself; it spawns a dedicated worker thread that owns
//! the connection, the argument buffer, and the reference the dispatcher
//! acquired, and inherits all three. An unreferenced-invocation event is
//! invoked the same way, on a fresh thread with no connection attached. Both
//! paths funnel through `invoke_and_reply` so the
//! acquire/invoke/reply/release sequence stays in one place.

use crate::sock::LocalSocket;
use crate::state::{DoorState, Request, Response};
use crate::wire;
use std::sync::Arc;
use std::thread;

/// Spawn the worker thread for one `door_call`. Takes ownership of the
/// connection and the reference the dispatcher held; releases that
/// reference (and fires an unreferenced-invocation if warranted) once the
/// reply has been written.
pub fn spawn(state: Arc<DoorState>, conn: LocalSocket, payload: Vec<u8>) {
    thread::spawn(move || {
        invoke_and_reply(&state, &conn, payload);
        let should_fire_unref = state.release();
        if should_fire_unref {
            spawn_unreferenced(state.clone());
        }
    });
}

/// Invoke the server procedure for a `door_call` already read off `conn` and
/// write its `door_return` reply.
///
/// Per the door semantic this is meant to express, returning a [`Response`]
/// from [`crate::state::ServerProcedure::invoke`] *is* the call to
/// `door_return`: there is no path back into the caller's frame once this
/// function has written the reply.
fn invoke_and_reply(state: &Arc<DoorState>, conn: &LocalSocket, payload: Vec<u8>) {
    let request = Request {
        cookie: state.cookie,
        data: &payload,
    };
    let response: Response<Vec<u8>> = state.procedure().invoke(state.cookie, request);
    let reply = response.data.unwrap_or_default();
    if let Err(e) = wire::write_door_return(conn, &reply) {
        log::debug!("door_return failed on door {:?}: {e}", state.id);
    }
}

/// Carry out an unreferenced-invocation dispatch: invoke the server
/// procedure with an empty request and no connection, matching the original
/// door server's practice of calling the procedure once with a
/// recognizable sentinel payload when a door's last external reference goes
/// away.
pub fn spawn_unreferenced(state: Arc<DoorState>) {
    thread::spawn(move || {
        state.acquire_for_unreferenced_dispatch();
        let request = Request {
            cookie: state.cookie,
            data: &[],
        };
        let _ = state.procedure().invoke(state.cookie, request);
        // `acquire_for_unreferenced_dispatch` left `IS_UNREF` set, so this
        // release can never itself satisfy the firing condition again.
        state.release();
    });
}
