//! Fixed-layout wire frames exchanged between client and server.
//!
//! Every frame starts with a 4-byte little-endian code. The remaining fields
//! are fixed-width little-endian integers; `door_call` and `door_return`
//! additionally carry a variable-length payload whose length is given by the
//! frame's own header, and which travels atomically with that header (one
//! `send`/`recv` on the underlying [`crate::sock::LocalSocket`]).

use crate::error::Error;
use crate::sock::LocalSocket;

pub const CODE_ERROR: u32 = 0;
pub const CODE_REQUEST: u32 = 1;
pub const CODE_DOOR_INFO: u32 = 2;
pub const CODE_GETPARAM_REPLY: u32 = 3;
pub const CODE_DOOR_CALL: u32 = 4;
pub const CODE_DOOR_RETURN: u32 = 5;

/// Sub-requests carried by a `request` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Info,
    DataMax,
    DataMin,
    DescMax,
}

impl RequestKind {
    pub fn to_wire(self) -> u32 {
        match self {
            RequestKind::Info => 0,
            RequestKind::DataMax => 1,
            RequestKind::DataMin => 2,
            RequestKind::DescMax => 3,
        }
    }

    fn from_wire(v: u32) -> Option<Self> {
        match v {
            0 => Some(RequestKind::Info),
            1 => Some(RequestKind::DataMax),
            2 => Some(RequestKind::DataMin),
            3 => Some(RequestKind::DescMax),
            _ => None,
        }
    }
}

/// The attributes/target/proc/cookie/id quintuple of a `door_info` reply.
#[derive(Debug, Clone, Copy)]
pub struct DoorInfo {
    pub attributes: u32,
    pub target_pid: u64,
    pub proc_ptr: u64,
    pub cookie: u64,
    pub id: u64,
}

const HEADER_ERROR: usize = 4 + 4;
const HEADER_REQUEST: usize = 4 + 4;
const HEADER_DOOR_INFO: usize = 4 + 4 + 8 + 8 + 8 + 8;
const HEADER_GETPARAM_REPLY: usize = 4 + 4 + 8;
/// Size of the fixed part of a `door_call`/`door_return` frame: code, n_desc,
/// arg_size/data_size. The payload follows immediately.
pub const CALL_HEADER_LEN: usize = 4 + 4 + 8;

fn bad(msg: &'static str) -> Error {
    Error::BadMessage(msg)
}

/// Peek the 4-byte code without consuming the message. Used by the
/// per-connection dispatcher and the client to decide how to parse the rest
/// of a pending frame.
pub fn peek_code(sock: &LocalSocket) -> Result<u32, Error> {
    let mut buf = [0u8; 4];
    let n = sock.recv(&mut buf, true)?;
    if n < 4 {
        return Err(bad("truncated message code"));
    }
    Ok(u32::from_le_bytes(buf))
}

pub fn write_error(sock: &LocalSocket, errno: i32) -> Result<(), Error> {
    let mut buf = [0u8; HEADER_ERROR];
    buf[0..4].copy_from_slice(&CODE_ERROR.to_le_bytes());
    buf[4..8].copy_from_slice(&errno.to_le_bytes());
    sock.send(&buf)?;
    Ok(())
}

pub fn read_error(sock: &LocalSocket) -> Result<i32, Error> {
    let mut buf = [0u8; HEADER_ERROR];
    sock.recv(&mut buf, false)?;
    if u32::from_le_bytes(buf[0..4].try_into().unwrap()) != CODE_ERROR {
        return Err(bad("expected error frame"));
    }
    Ok(i32::from_le_bytes(buf[4..8].try_into().unwrap()))
}

pub fn write_request(sock: &LocalSocket, kind: RequestKind) -> Result<(), Error> {
    let mut buf = [0u8; HEADER_REQUEST];
    buf[0..4].copy_from_slice(&CODE_REQUEST.to_le_bytes());
    buf[4..8].copy_from_slice(&kind.to_wire().to_le_bytes());
    sock.send(&buf)?;
    Ok(())
}

pub fn read_request(sock: &LocalSocket) -> Result<RequestKind, Error> {
    let mut buf = [0u8; HEADER_REQUEST];
    sock.recv(&mut buf, false)?;
    if u32::from_le_bytes(buf[0..4].try_into().unwrap()) != CODE_REQUEST {
        return Err(bad("expected request frame"));
    }
    let sub = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    // §4.5/§7: an unknown sub-request is `error(EINVAL)`, not a malformed
    // frame -- the frame itself parsed fine, the value it carries is just
    // not one the receiver recognizes.
    RequestKind::from_wire(sub).ok_or(Error::InvalidArgument("unknown sub-request"))
}

pub fn write_door_info(sock: &LocalSocket, info: DoorInfo) -> Result<(), Error> {
    let mut buf = [0u8; HEADER_DOOR_INFO];
    buf[0..4].copy_from_slice(&CODE_DOOR_INFO.to_le_bytes());
    buf[4..8].copy_from_slice(&info.attributes.to_le_bytes());
    buf[8..16].copy_from_slice(&info.target_pid.to_le_bytes());
    buf[16..24].copy_from_slice(&info.proc_ptr.to_le_bytes());
    buf[24..32].copy_from_slice(&info.cookie.to_le_bytes());
    buf[32..40].copy_from_slice(&info.id.to_le_bytes());
    sock.send(&buf)?;
    Ok(())
}

pub fn read_door_info(sock: &LocalSocket) -> Result<DoorInfo, Error> {
    let mut buf = [0u8; HEADER_DOOR_INFO];
    sock.recv(&mut buf, false)?;
    if u32::from_le_bytes(buf[0..4].try_into().unwrap()) != CODE_DOOR_INFO {
        return Err(bad("expected door_info frame"));
    }
    Ok(DoorInfo {
        attributes: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        target_pid: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        proc_ptr: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        cookie: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
        id: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
    })
}

pub fn write_getparam_reply(sock: &LocalSocket, param: u32, value: u64) -> Result<(), Error> {
    let mut buf = [0u8; HEADER_GETPARAM_REPLY];
    buf[0..4].copy_from_slice(&CODE_GETPARAM_REPLY.to_le_bytes());
    buf[4..8].copy_from_slice(&param.to_le_bytes());
    buf[8..16].copy_from_slice(&value.to_le_bytes());
    sock.send(&buf)?;
    Ok(())
}

pub fn read_getparam_reply(sock: &LocalSocket) -> Result<(u32, u64), Error> {
    let mut buf = [0u8; HEADER_GETPARAM_REPLY];
    sock.recv(&mut buf, false)?;
    if u32::from_le_bytes(buf[0..4].try_into().unwrap()) != CODE_GETPARAM_REPLY {
        return Err(bad("expected getparam_reply frame"));
    }
    let param = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    let value = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    Ok((param, value))
}

/// Peek the header of a `door_call`/`door_return` frame (code, n_desc,
/// size) without consuming the message, so the caller can size a buffer
/// before doing the atomic header+payload read.
pub fn peek_call_header(sock: &LocalSocket) -> Result<(u32, u32, u64), Error> {
    let mut buf = [0u8; CALL_HEADER_LEN];
    let n = sock.recv(&mut buf, true)?;
    if n < CALL_HEADER_LEN {
        return Err(bad("truncated call header"));
    }
    let code = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let n_desc = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    let size = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    Ok((code, n_desc, size))
}

/// Read a `door_call`/`door_return` header plus its payload in one atomic
/// receive, given the payload length already learned via [`peek_call_header`].
pub fn read_call_body(sock: &LocalSocket, expect_code: u32, size: u64) -> Result<Vec<u8>, Error> {
    let total = CALL_HEADER_LEN
        .checked_add(size as usize)
        .ok_or(Error::NoMemory)?;
    let mut buf = vec![0u8; total];
    let n = sock.recv(&mut buf, false)?;
    if n != total {
        return Err(bad("short read of call frame"));
    }
    let code = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    if code != expect_code {
        return Err(bad("unexpected frame code"));
    }
    Ok(buf.split_off(CALL_HEADER_LEN))
}

fn write_call_like(sock: &LocalSocket, code: u32, n_desc: u32, payload: &[u8]) -> Result<(), Error> {
    let mut buf = Vec::with_capacity(CALL_HEADER_LEN + payload.len());
    buf.extend_from_slice(&code.to_le_bytes());
    buf.extend_from_slice(&n_desc.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    buf.extend_from_slice(payload);
    sock.send(&buf)?;
    Ok(())
}

pub fn write_door_call(sock: &LocalSocket, payload: &[u8]) -> Result<(), Error> {
    write_call_like(sock, CODE_DOOR_CALL, 0, payload)
}

pub fn write_door_return(sock: &LocalSocket, payload: &[u8]) -> Result<(), Error> {
    write_call_like(sock, CODE_DOOR_RETURN, 0, payload)
}
