//! Error taxonomy for the door runtime.

use std::panic::Location;

/// Failure conditions produced by the public API.
///
/// These correspond one-to-one with the wire-level `error` frame and the
/// local-only failures that never cross the socket (e.g. [`Error::NotPermitted`]
/// from `detach`).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("descriptor does not refer to a live local door")]
    BadDescriptor,

    #[error("malformed or unexpected wire message: {0}")]
    BadMessage(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("path is {len} bytes, exceeds the transport limit of {max}")]
    NameTooLong { len: usize, max: usize },

    #[error("payload size {size} is outside [{min}, {max}]")]
    NoBuffers { size: u64, min: u64, max: u64 },

    #[error("allocation failed")]
    NoMemory,

    #[error("target is not a local-door filesystem node")]
    NotPermitted,

    #[error("value {value} is out of range for {param}")]
    OutOfRange { param: &'static str, value: u64 },

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("call carried {0} descriptors, only 0 is supported")]
    TooManyDescriptors(u32),

    #[error("transport failure: {0}")]
    IoFailure(#[from] std::io::Error),
}

impl Error {
    /// Map this error onto the wire-level `errno` carried by an `error` frame.
    pub(crate) fn to_errno(&self) -> libc::c_int {
        match self {
            Error::BadDescriptor => libc::EBADF,
            Error::BadMessage(_) => libc::EBADMSG,
            Error::InvalidArgument(_) => libc::EINVAL,
            Error::NameTooLong { .. } => libc::ENAMETOOLONG,
            Error::NoBuffers { .. } => libc::ENOBUFS,
            Error::NoMemory => libc::ENOMEM,
            Error::NotPermitted => libc::EPERM,
            Error::OutOfRange { .. } => libc::ERANGE,
            Error::Unsupported(_) => libc::ENOTSUP,
            Error::TooManyDescriptors(_) => libc::ENFILE,
            Error::IoFailure(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Reconstruct an [`Error`] from the `errno` carried by a wire-level `error`
/// frame. The reconstructed value necessarily loses whatever detail the
/// server-side variant carried beyond its errno (a message, a size); callers
/// that need that detail are on the server side of the same process.
pub(crate) fn from_errno(errno: libc::c_int) -> Error {
    match errno {
        libc::EBADF => Error::BadDescriptor,
        libc::EBADMSG => Error::BadMessage("server rejected the frame"),
        libc::EINVAL => Error::InvalidArgument("server rejected the argument"),
        libc::ENAMETOOLONG => Error::NameTooLong { len: 0, max: 0 },
        libc::ENOBUFS => Error::NoBuffers { size: 0, min: 0, max: 0 },
        libc::ENOMEM => Error::NoMemory,
        libc::EPERM => Error::NotPermitted,
        libc::ERANGE => Error::OutOfRange { param: "unknown", value: 0 },
        libc::ENOTSUP => Error::Unsupported("server does not support this operation"),
        libc::ENFILE => Error::TooManyDescriptors(0),
        other => Error::IoFailure(std::io::Error::from_raw_os_error(other)),
    }
}

/// Abort the process after logging the offending primitive and call site.
///
/// Used for invariant violations the spec treats as unrecoverable: a negative
/// refcount, a poisoned table lock, a fork hook firing out of order. These are
/// bugs in the runtime itself, not conditions a caller can recover from.
#[track_caller]
pub(crate) fn invariant_violation(primitive: &str) -> ! {
    let loc = Location::caller();
    log::error!(
        "door runtime invariant violated in {primitive} at {}:{}",
        loc.file(),
        loc.line()
    );
    std::process::abort()
}
