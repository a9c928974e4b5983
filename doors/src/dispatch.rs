//! Per-connection dispatch: one thread per accepted connection, handling
//! `request` sub-requests directly and handing a `door_call` frame off to
//! the invocation worker.
//!
//! The accept loop acquires one door-state reference per accepted
//! connection and hands it to this thread. A connection may answer any
//! number of `request` frames, but at most one `door_call`: once a call is
//! handed to the worker, the worker owns the connection and the inherited
//! reference and closes both after replying.

use crate::error::Error;
use crate::sock::LocalSocket;
use crate::state::DoorState;
use crate::wire::{self, CODE_DOOR_CALL, CODE_REQUEST, RequestKind};
use std::sync::Arc;

pub fn run(state: Arc<DoorState>, conn: LocalSocket) {
    loop {
        let code = match wire::peek_code(&conn) {
            Ok(code) => code,
            Err(_) => {
                log::trace!("connection closed on door {:?}", state.id);
                state.release();
                return;
            }
        };

        match code {
            CODE_REQUEST => {
                if let Err(e) = handle_request(&state, &conn) {
                    log::debug!("request error on door {:?}: {e}", state.id);
                    let _ = wire::write_error(&conn, e.to_errno());
                }
            }
            CODE_DOOR_CALL => {
                match read_call(&state, &conn) {
                    Ok(payload) => {
                        // The worker now owns `conn` and the reference this
                        // dispatcher was holding.
                        crate::worker::spawn(state, conn, payload);
                        return;
                    }
                    Err(e) => {
                        log::debug!("door_call rejected on door {:?}: {e}", state.id);
                        let _ = wire::write_error(&conn, e.to_errno());
                        state.release();
                        return;
                    }
                }
            }
            _ => {
                let _ = wire::write_error(&conn, Error::BadMessage("unexpected frame").to_errno());
                state.release();
                return;
            }
        }
    }
}

fn handle_request(state: &Arc<DoorState>, conn: &LocalSocket) -> Result<(), Error> {
    let kind = wire::read_request(conn)?;
    match kind {
        RequestKind::Info => {
            let attrs = state.attributes();
            let info = wire::DoorInfo {
                attributes: attrs.bits(),
                target_pid: std::process::id() as u64,
                // Opaque to callers outside this process; only meaningful as
                // an equality check against a value from the same process.
                proc_ptr: state.id.as_u64(),
                cookie: state.cookie,
                id: state.id.as_u64(),
            };
            wire::write_door_info(conn, info)
        }
        RequestKind::DataMax => {
            let (_, max) = state.data_range();
            wire::write_getparam_reply(conn, RequestKind::DataMax.to_wire(), max)
        }
        RequestKind::DataMin => {
            let (min, _) = state.data_range();
            wire::write_getparam_reply(conn, RequestKind::DataMin.to_wire(), min)
        }
        RequestKind::DescMax => wire::write_getparam_reply(conn, RequestKind::DescMax.to_wire(), 0),
    }
}

/// Validate and read a `door_call` frame's body. Consumes the pending
/// message from the connection in every case (even on validation failure)
/// so a malformed call cannot wedge the socket.
fn read_call(state: &Arc<DoorState>, conn: &LocalSocket) -> Result<Vec<u8>, Error> {
    let (_, n_desc, size) = wire::peek_call_header(conn)?;

    if n_desc != 0 {
        let _ = wire::read_call_body(conn, CODE_DOOR_CALL, size)?;
        return Err(Error::TooManyDescriptors(n_desc));
    }

    let (min, max) = state.data_range();
    if size < min || size > max {
        let _ = wire::read_call_body(conn, CODE_DOOR_CALL, size)?;
        return Err(Error::NoBuffers { size, min, max });
    }

    let payload = wire::read_call_body(conn, CODE_DOOR_CALL, size)?;

    if state.is_revoked() {
        return Err(Error::NotPermitted);
    }

    Ok(payload)
}
