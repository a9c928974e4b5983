/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! The server side of a door: creating one, attaching it to the filesystem,
//! and tearing it down.

use crate::attrs::Attributes;
use crate::error::Error;
use crate::id::DoorId;
use crate::runtime::runtime;
use crate::sock::{self, LocalSocket};
use crate::state::{DoorState, ServerProcedure};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use crate::state::{Request, Response};

/// A server-side handle to a door. Dropping it revokes the door.
pub struct Door {
    state: Arc<DoorState>,
}

/// A parameter governing how large a request/reply payload a door will
/// accept, as reported by and set through `request`/`getparam` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    DataMax,
    DataMin,
    /// Always reads back as zero; this runtime never supports passing
    /// descriptors (every door is created with `REFUSE_DESC`).
    DescMax,
}

/// The server-side view of a door's identity and configuration, assembled
/// directly from [`DoorState`] rather than over the wire (the creating
/// process already holds the `Arc` -- see [`Door::info`]).
#[derive(Debug, Clone, Copy)]
pub struct DoorInfo {
    pub id: DoorId,
    pub cookie: u64,
    pub attributes: Attributes,
    pub target_pid: u64,
}

/// Unlink the door node at `path`, without needing a live [`Door`] handle
/// for it. Fails with [`Error::NotPermitted`] if the path cannot be
/// `stat`-ed at all, or if it exists but is not a local-socket node (see
/// [`sock::detach`]).
pub fn detach<P: AsRef<Path>>(path: P) -> Result<(), Error> {
    sock::detach(path.as_ref())
}

impl Door {
    pub fn create(sp: impl ServerProcedure + 'static) -> Result<Self, Error> {
        Self::create_with_cookie_and_attributes(sp, 0, Attributes::default())
    }

    pub fn create_with_cookie(sp: impl ServerProcedure + 'static, cookie: u64) -> Result<Self, Error> {
        Self::create_with_cookie_and_attributes(sp, cookie, Attributes::default())
    }

    pub fn create_with_attributes(sp: impl ServerProcedure + 'static, attrs: Attributes) -> Result<Self, Error> {
        Self::create_with_cookie_and_attributes(sp, 0, attrs)
    }

    pub fn create_with_cookie_and_attributes(
        sp: impl ServerProcedure + 'static,
        cookie: u64,
        mut attrs: Attributes,
    ) -> Result<Self, Error> {
        attrs.insert(Attributes::REFUSE_DESC | Attributes::LOCAL);
        let rt = runtime();
        let id = rt.ids.next();
        // §4.3: data_max defaults to the host's default socket receive
        // buffer, less the door_call header; a door created on a host
        // where that can't be queried falls back to a conservative default.
        let data_max = sock::default_rcvbuf()
            .ok()
            .and_then(|b| b.checked_sub(crate::wire::CALL_HEADER_LEN))
            .unwrap_or(16 * 1024) as u64;
        let state = Arc::new(DoorState::new(id, cookie, attrs, data_max, Box::new(sp)));
        rt.table.install(state.clone())?;
        crate::accept::spawn(state.clone());
        Ok(Self { state })
    }

    pub fn id(&self) -> DoorId {
        self.state.id
    }

    /// Expose this door on the filesystem at `path`. Plain local sockets
    /// can only be bound once in their lifetime, so a door can be attached
    /// at most once; a second call returns [`Error::NotPermitted`]. A
    /// revoked door is no longer a valid local door at all (§7), so
    /// attaching one fails with [`Error::BadDescriptor`] instead.
    pub fn attach<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        if self.state.is_revoked() {
            return Err(Error::BadDescriptor);
        }
        if self.state.path.lock().unwrap_or_else(|e| e.into_inner()).is_some() {
            return Err(Error::NotPermitted);
        }
        let listener = self.state.listener.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if listener.is_some() {
            return Err(Error::NotPermitted);
        }
        let sock = LocalSocket::unbound()?;
        self.state.apply_rcvbuf(&sock)?;
        sock.bind_listen(path, 128)?;
        self.state.set_listener(path.to_path_buf(), Arc::new(sock));
        Ok(())
    }

    /// Like [`Door::attach`], but removes any pre-existing node at `path`
    /// first.
    pub fn force_attach<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        if path.exists() {
            sock::detach(path)?;
        }
        self.attach(path)
    }

    /// Unlink the filesystem path this door is attached to. The door itself
    /// keeps running (existing connections and the accept loop are
    /// unaffected); only new clients are prevented from discovering it by
    /// path.
    pub fn detach(&self) -> Result<(), Error> {
        let mut path_guard = self.state.path.lock().unwrap_or_else(|e| e.into_inner());
        match path_guard.take() {
            Some(path) => {
                sock::detach(&path)?;
                Ok(())
            }
            None => Err(Error::InvalidArgument("door is not attached")),
        }
    }

    /// Revoke the door: no further calls are accepted, the table drops its
    /// reference, and the accept loop exits once it notices.
    ///
    /// Per §4.3, `revoke` atomically `take`s the table's own reference
    /// first; a door that has already been revoked (by an earlier call, or
    /// by `Drop` after one) is no longer present in the table, and this
    /// fails with [`Error::BadDescriptor`] rather than silently succeeding
    /// again (§8 Testable Property 5).
    ///
    /// The listening endpoint is closed here so an accept loop parked in a
    /// blocking `accept()` call unblocks with an error rather than waiting
    /// for a connection that will never come; merely dropping the table's
    /// own reference would not do it, since the accept loop holds its own
    /// clone of the same listener.
    pub fn revoke(&self) -> Result<(), Error> {
        if runtime().table.take(self.state.id).is_none() {
            return Err(Error::BadDescriptor);
        }
        self.state.mark_revoked();
        if let Some(listener) = self.state.listener.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            listener.close_now();
        }
        Ok(())
    }

    pub fn info(&self) -> DoorInfo {
        DoorInfo {
            id: self.state.id,
            cookie: self.state.cookie,
            attributes: self.state.attributes(),
            target_pid: std::process::id() as u64,
        }
    }

    pub fn getparam(&self, param: Param) -> u64 {
        let (min, max) = self.state.data_range();
        match param {
            Param::DataMax => max,
            Param::DataMin => min,
            Param::DescMax => 0,
        }
    }

    /// Set one of the door's tunable bounds. `DescMax` can only ever be set
    /// to zero: this runtime always carries `REFUSE_DESC`, so any positive
    /// value is rejected as unsupported rather than out of range.
    pub fn setparam(&self, param: Param, value: u64) -> Result<(), Error> {
        let (min, max) = self.state.data_range();
        match param {
            Param::DataMax => {
                if value < min {
                    return Err(Error::OutOfRange { param: "data_max", value });
                }
                self.state.set_data_max(value);
                self.state.resize_rcvbuf_if_attached();
            }
            Param::DataMin => {
                if value > max {
                    return Err(Error::OutOfRange { param: "data_min", value });
                }
                self.state.set_data_min(value);
            }
            Param::DescMax => {
                if value != 0 {
                    return Err(Error::Unsupported("descriptor passing is never supported"));
                }
            }
        }
        Ok(())
    }
}

impl Drop for Door {
    fn drop(&mut self) {
        let _ = self.revoke();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn noop(_cookie: u64, _req: Request<'_>) -> Response<Vec<u8>> {
        Response::empty()
    }

    #[test]
    #[serial]
    fn create_assigns_a_fresh_id() {
        let a = Door::create(noop).unwrap();
        let b = Door::create(noop).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    #[serial]
    fn attach_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("door");
        let door = Door::create(noop).unwrap();
        door.attach(&path).unwrap();
        assert!(door.attach(&path).is_err());
    }

    #[test]
    #[serial]
    fn detach_without_attach_fails() {
        let door = Door::create(noop).unwrap();
        assert!(door.detach().is_err());
    }

    #[test]
    #[serial]
    fn revoking_twice_fails_with_bad_descriptor() {
        let door = Door::create(noop).unwrap();
        door.revoke().unwrap();
        assert!(matches!(door.revoke(), Err(Error::BadDescriptor)));
    }

    #[test]
    #[serial]
    fn attach_after_revoke_fails_with_bad_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("door");
        let door = Door::create(noop).unwrap();
        door.revoke().unwrap();
        assert!(matches!(door.attach(&path), Err(Error::BadDescriptor)));
    }
}
