//! A connection-oriented, message-boundary-preserving local socket.
//!
//! This is the host-OS collaborator the distilled spec leaves out of scope
//! (§6): a `AF_UNIX`/`SOCK_SEQPACKET` endpoint. `std::os::unix::net` has no
//! `SOCK_SEQPACKET` support, so this wraps the handful of `libc` calls we
//! need directly, in the same unsafe-FFI-with-a-thin-safe-wrapper style the
//! rest of this crate uses for the underlying transport.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};

/// A socket descriptor that can be force-closed from another thread while
/// this handle (or clones of the `Arc` around it) are still alive.
///
/// `revoke` (§4.3/§4.4) needs to unblock an accept loop that may be parked
/// in a blocking `accept()` call on another thread, and the only portable
/// way to do that is to close the fd out from under it -- closing a fd a
/// thread is blocked on in `accept()` causes that call to return with an
/// error. Plain `Drop`-based closing can't do this safely once the listener
/// is shared (the accept loop holds its own clone of the same `Arc`), so the
/// fd lives behind an `AtomicI32`: whichever of `close_now` or `Drop` gets
/// there first performs the real `close(2)`, the other is a no-op.
pub struct LocalSocket(AtomicI32);

const CLOSED: libc::c_int = -1;

fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn path_to_sockaddr(path: &Path) -> io::Result<(libc::sockaddr_un, libc::socklen_t)> {
    // Reject interior NULs up front (a path containing one could otherwise
    // be silently truncated by `sun_path`'s C-string convention).
    path_cstring(path)?;
    let bytes = path.as_os_str().as_bytes();
    if bytes.len() >= 108 {
        // Surfaces as `Error::NameTooLong` (§7) once the caller's `?`
        // converts this into the crate's own error type, rather than a
        // generic transport failure.
        return Err(io::Error::from_raw_os_error(libc::ENAMETOOLONG));
    }
    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes.iter()) {
        *dst = *src as libc::c_char;
    }
    let len = mem::size_of::<libc::sa_family_t>() + bytes.len() + 1;
    Ok((addr, len as libc::socklen_t))
}

impl LocalSocket {
    /// Create a fresh, unbound `SOCK_SEQPACKET` endpoint. Corresponds to the
    /// door's existence before it has been attached to a filesystem path.
    pub fn unbound() -> io::Result<Self> {
        let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_SEQPACKET, 0) };
        cvt(fd)?;
        let sock = Self(AtomicI32::new(fd));
        sock.set_cloexec()?;
        Ok(sock)
    }

    fn fd(&self) -> io::Result<RawFd> {
        match self.0.load(Ordering::Acquire) {
            CLOSED => Err(io::Error::from_raw_os_error(libc::EBADF)),
            fd => Ok(fd),
        }
    }

    /// Close the underlying descriptor now, even if other `Arc` clones of
    /// this socket are still alive elsewhere. Idempotent and safe to race
    /// against `Drop` or another `close_now` call: only the caller that
    /// wins the swap to [`CLOSED`] issues the real `close(2)`.
    pub fn close_now(&self) {
        let fd = self.0.swap(CLOSED, Ordering::AcqRel);
        if fd != CLOSED {
            unsafe { libc::close(fd) };
        }
    }

    /// Bind to `path` and start listening. The umask is tightened for the
    /// duration of the bind so that no other process can reach the node
    /// before the caller has a chance to set its intended mode; this is a
    /// process-wide resource and is not isolated from concurrent unrelated
    /// umask changes (see §5).
    pub fn bind_listen(&self, path: &Path, backlog: i32) -> io::Result<()> {
        let fd = self.fd()?;
        let (addr, len) = path_to_sockaddr(path)?;
        let old_umask = unsafe { libc::umask(0o777) };
        let bound = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                len,
            )
        };
        unsafe { libc::umask(old_umask) };
        cvt(bound)?;
        cvt(unsafe { libc::listen(fd, backlog) })?;
        Ok(())
    }

    pub fn connect(path: &Path) -> io::Result<Self> {
        let sock = Self::unbound()?;
        let (addr, len) = path_to_sockaddr(path)?;
        cvt(unsafe {
            libc::connect(
                sock.fd()?,
                &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                len,
            )
        })?;
        Ok(sock)
    }

    pub fn accept(&self) -> io::Result<Self> {
        let fd = unsafe { libc::accept(self.fd()?, std::ptr::null_mut(), std::ptr::null_mut()) };
        cvt(fd)?;
        let sock = Self(AtomicI32::new(fd));
        sock.set_cloexec()?;
        Ok(sock)
    }

    fn set_cloexec(&self) -> io::Result<()> {
        let fd = self.fd()?;
        let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFD) })?;
        cvt(unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) })?;
        Ok(())
    }

    /// Receive into `buf`. When `peek` is set, the message is left on the
    /// socket so a subsequent call can read it (and its full length) again.
    pub fn recv(&self, buf: &mut [u8], peek: bool) -> io::Result<usize> {
        let flags = if peek { libc::MSG_PEEK } else { 0 };
        let n = unsafe {
            libc::recv(
                self.fd()?,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                flags,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe { libc::send(self.fd()?, buf.as_ptr() as *const libc::c_void, buf.len(), 0) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    pub fn set_rcvbuf(&self, bytes: usize) -> io::Result<()> {
        let val = bytes as libc::c_int;
        cvt(unsafe {
            libc::setsockopt(
                self.fd()?,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                &val as *const libc::c_int as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        })?;
        Ok(())
    }

    pub fn rcvbuf(&self) -> io::Result<usize> {
        let mut val: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        cvt(unsafe {
            libc::getsockopt(
                self.fd()?,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                &mut val as *mut libc::c_int as *mut libc::c_void,
                &mut len,
            )
        })?;
        Ok(val as usize)
    }
}

impl AsRawFd for LocalSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.0.load(Ordering::Acquire)
    }
}

impl FromRawFd for LocalSocket {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self(AtomicI32::new(fd))
    }
}

impl IntoRawFd for LocalSocket {
    fn into_raw_fd(self) -> RawFd {
        self.0.swap(CLOSED, Ordering::AcqRel)
    }
}

impl Drop for LocalSocket {
    fn drop(&mut self) {
        self.close_now();
    }
}

/// Query the OS default `SO_RCVBUF` for a fresh `SOCK_SEQPACKET` endpoint,
/// via a throwaway unbound socket. Used at door-creation time to seed
/// `data_max` the way §4.3 specifies ("`data_max` = default_rcvbuf −
/// header_size"), before any path (and therefore any real listening socket)
/// exists yet.
pub fn default_rcvbuf() -> io::Result<usize> {
    LocalSocket::unbound()?.rcvbuf()
}

/// Remove a bound local-socket path after confirming it really is one.
///
/// Per spec.md §9 Design Notes' resolution of its own "likely source bug"
/// (one revision of the original fails when `stat` *succeeds*), the correct
/// behavior is the opposite of a naive reading of §4.3: fail when `stat`
/// fails, and fail when the target exists but is not a local-socket node.
/// `original_source/door.c`'s `door_detach` agrees, returning `EPERM` when
/// its `stat` call fails. Both failure modes surface as
/// [`crate::error::Error::NotPermitted`].
pub fn detach(path: &Path) -> Result<(), crate::error::Error> {
    use crate::error::Error;
    let meta = std::fs::symlink_metadata(path).map_err(|_| Error::NotPermitted)?;
    use std::os::unix::fs::FileTypeExt;
    if !meta.file_type().is_socket() {
        return Err(Error::NotPermitted);
    }
    std::fs::remove_file(path).map_err(Error::from)
}

/// Validate that `path` contains no interior `NUL` byte, which would
/// otherwise silently truncate the copy into `sockaddr_un::sun_path`. Kept
/// separate from the 108-byte length check in [`path_to_sockaddr`] so the
/// two failure modes stay distinguishable.
pub fn path_cstring(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn detach_fails_when_stat_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("never-created");
        assert!(matches!(detach(&missing), Err(Error::NotPermitted)));
    }

    #[test]
    fn detach_fails_on_a_non_socket_node() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain-file");
        std::fs::write(&path, b"not a door").unwrap();
        assert!(matches!(detach(&path), Err(Error::NotPermitted)));
        assert!(path.exists(), "detach must not remove a non-socket node");
    }
}
