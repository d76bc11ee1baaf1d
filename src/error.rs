use failure::{Backtrace, Context, Fail};
use std::fmt;
use std::io;

/// Error type for the metadata/capability core.
///
/// Every [`MdErrorKind`] maps onto the errno taxonomy from the design
/// document (`NotFound` -> ENOENT, `Permission` -> EPERM/EACCES, ...); see
/// [`MdErrorKind::errno`].
#[derive(Debug)]
pub struct MdError {
    inner: Context<MdErrorKind>,
}

/// Kinds of errors produced by this crate.
#[derive(Debug, Fail, Clone, Copy, PartialEq, Eq)]
pub enum MdErrorKind {
    /// MD record absent or flagged deleted.
    #[fail(display = "no such file or directory")]
    NotFound,
    /// cap does not satisfy the requested mode.
    #[fail(display = "permission denied")]
    Permission,
    /// local or server-reported quota exhaustion.
    #[fail(display = "disk quota exceeded")]
    Quota,
    /// create/mkdir/symlink target already exists.
    #[fail(display = "file exists")]
    Exists,
    /// rmdir on a non-empty directory.
    #[fail(display = "directory not empty")]
    NotEmpty,
    /// flush queue still has pending work for this inode.
    #[fail(display = "resource temporarily unavailable")]
    Busy,
    /// vmap mismatch or unexpected container type from the server.
    #[fail(display = "protocol error")]
    Protocol,
    /// backend RPC timed out or the connection failed.
    #[fail(display = "transport error")]
    Transport,
    /// backend RPC timed out specifically (distinguished surfaced errno).
    #[fail(display = "operation timed out")]
    TimedOut,
    /// the server evicted this client; the mount must unmount.
    #[fail(display = "client evicted by server")]
    Evicted,
    /// I/O error talking to the KVStore or the wire.
    #[fail(display = "io error")]
    Io,
    /// json (de)serialization error on the wire or in the KV spill.
    #[fail(display = "json error")]
    Json,
    /// sled storage engine error.
    #[fail(display = "sled error")]
    Sled,
}

impl MdErrorKind {
    /// best-effort reverse mapping from a surfaced errno back to a kind, used
    /// when a bare `Errno` response needs to become a typed error. Several
    /// kinds share an errno (`Transport`/`Evicted`/`Io`/`Json`/`Sled` all
    /// surface as `EIO`); those collapse to `Transport` on the way back.
    pub fn from_errno(errno: i32) -> MdErrorKind {
        match errno {
            2 => MdErrorKind::NotFound,
            1 => MdErrorKind::Permission,
            122 => MdErrorKind::Quota,
            17 => MdErrorKind::Exists,
            39 => MdErrorKind::NotEmpty,
            11 => MdErrorKind::Busy,
            6 => MdErrorKind::Protocol,
            110 => MdErrorKind::TimedOut,
            _ => MdErrorKind::Transport,
        }
    }

    /// POSIX errno this kind surfaces as at the FUSE boundary.
    pub fn errno(self) -> i32 {
        match self {
            MdErrorKind::NotFound => libc_enoent(),
            MdErrorKind::Permission => libc_eperm(),
            MdErrorKind::Quota => libc_edquot(),
            MdErrorKind::Exists => libc_eexist(),
            MdErrorKind::NotEmpty => libc_enotempty(),
            MdErrorKind::Busy => libc_eagain(),
            MdErrorKind::Protocol => libc_enxio(),
            MdErrorKind::Transport => libc_eio(),
            MdErrorKind::TimedOut => libc_etimedout(),
            MdErrorKind::Evicted => libc_eio(),
            MdErrorKind::Io => libc_eio(),
            MdErrorKind::Json => libc_eio(),
            MdErrorKind::Sled => libc_eio(),
        }
    }
}

// Minimal errno constants so this crate does not need to depend on the
// `libc` crate just for a handful of integers; these match every common
// POSIX platform's `<errno.h>`.
fn libc_enoent() -> i32 {
    2
}
fn libc_eio() -> i32 {
    5
}
fn libc_eagain() -> i32 {
    11
}
fn libc_eperm() -> i32 {
    1
}
fn libc_eexist() -> i32 {
    17
}
fn libc_enotempty() -> i32 {
    39
}
fn libc_enxio() -> i32 {
    6
}
fn libc_etimedout() -> i32 {
    110
}
fn libc_edquot() -> i32 {
    122
}

impl Fail for MdError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl MdError {
    /// The errno this error surfaces as at the FUSE boundary.
    pub fn errno(&self) -> i32 {
        self.inner.get_context().errno()
    }

    /// The underlying kind.
    pub fn kind(&self) -> MdErrorKind {
        *self.inner.get_context()
    }
}

impl fmt::Display for MdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl From<MdErrorKind> for MdError {
    fn from(kind: MdErrorKind) -> MdError {
        MdError {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<MdErrorKind>> for MdError {
    fn from(context: Context<MdErrorKind>) -> MdError {
        MdError { inner: context }
    }
}

impl From<io::Error> for MdError {
    fn from(error: io::Error) -> MdError {
        error.context(MdErrorKind::Io).into()
    }
}

impl From<serde_json::Error> for MdError {
    fn from(error: serde_json::Error) -> MdError {
        error.context(MdErrorKind::Json).into()
    }
}

impl From<sled::Error> for MdError {
    fn from(error: sled::Error) -> MdError {
        error.context(MdErrorKind::Sled).into()
    }
}

/// Result type used throughout this crate.
pub type Result<T> = core::result::Result<T, MdError>;
