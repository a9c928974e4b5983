/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */
//! A Rust-friendly door client.

use crate::attrs::Attributes;
use crate::error::Error;
use crate::id::DoorId;
use crate::sock::LocalSocket;
use crate::wire::{self, RequestKind};
use std::path::Path;

/// A connection to a remote door, opened once and reusable for any number
/// of calls.
///
/// Unlike the original door model, where each `door_call` is a single
/// syscall over a descriptor obtained from `open(2)`, this transport is a
/// connection: opening it once and issuing many calls over it amortizes the
/// `connect` cost across calls. A fresh connection per call is also fine --
/// `Client::open` is cheap.
pub struct Client {
    sock: LocalSocket,
}

impl Client {
    /// Connect to the door attached at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let sock = LocalSocket::connect(path.as_ref())?;
        Ok(Self { sock })
    }

    /// Issue a door call and return the server's reply payload.
    pub fn call(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        wire::write_door_call(&self.sock, data)?;
        self.read_reply()
    }

    fn read_reply(&self) -> Result<Vec<u8>, Error> {
        let code = wire::peek_code(&self.sock)?;
        if code == wire::CODE_ERROR {
            let errno = wire::read_error(&self.sock)?;
            return Err(crate::error::from_errno(errno));
        }
        let (_, _n_desc, size) = wire::peek_call_header(&self.sock)?;
        wire::read_call_body(&self.sock, wire::CODE_DOOR_RETURN, size)
    }

    /// Fetch the door's identity and attributes over the wire.
    pub fn info(&self) -> Result<DoorInfo, Error> {
        wire::write_request(&self.sock, RequestKind::Info)?;
        let info = wire::read_door_info(&self.sock)?;
        Ok(DoorInfo {
            id: DoorId::from(info.id),
            cookie: info.cookie,
            attributes: Attributes::from_bits_truncate(info.attributes),
            target_pid: info.target_pid,
        })
    }

    /// Fetch one of the door's tunable payload-size limits over the wire.
    pub fn getparam(&self, param: RemoteParam) -> Result<u64, Error> {
        let kind = param.into();
        wire::write_request(&self.sock, kind)?;
        let (_, value) = wire::read_getparam_reply(&self.sock)?;
        Ok(value)
    }
}

/// Parameters a client can query remotely. `DescMax` always reads back as
/// zero (descriptor passing is never supported), but is exposed for parity
/// with the original four-parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteParam {
    DataMax,
    DataMin,
    DescMax,
}

impl From<RemoteParam> for RequestKind {
    fn from(p: RemoteParam) -> Self {
        match p {
            RemoteParam::DataMax => RequestKind::DataMax,
            RemoteParam::DataMin => RequestKind::DataMin,
            RemoteParam::DescMax => RequestKind::DescMax,
        }
    }
}

/// The client-side view of a door's identity, fetched over the wire.
#[derive(Debug, Clone, Copy)]
pub struct DoorInfo {
    pub id: DoorId,
    pub cookie: u64,
    pub attributes: Attributes,
    pub target_pid: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{Door, Request, Response};
    use serial_test::serial;

    fn echo(_cookie: u64, req: Request<'_>) -> Response<Vec<u8>> {
        Response::new(req.data.to_vec())
    }

    #[test]
    #[serial]
    fn call_round_trips_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("echo.door");
        let door = Door::create(echo).unwrap();
        door.attach(&path).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));

        let client = Client::open(&path).unwrap();
        let reply = client.call(b"hello").unwrap();
        assert_eq!(reply, b"hello");
    }

    #[test]
    #[serial]
    fn info_reports_the_same_id_the_server_sees() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("info.door");
        let door = Door::create(echo).unwrap();
        door.attach(&path).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));

        let client = Client::open(&path).unwrap();
        let info = client.info().unwrap();
        assert_eq!(info.id, door.id());
    }
}
