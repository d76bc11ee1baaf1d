//! The shared metadata cache: MD records keyed by local-ino, each behind its
//! own lock (§4.5).

pub mod cache;
pub mod record;

pub use cache::{MdCache, MdHandle, NewEntryAttrs};
pub use record::{MdOp, MdRecord, MdType, Timespec};

/// KVStore tag under which whole `MdRecord`s are spilled by the `LSTORE`
/// flush path; shared between [`cache`] and [`crate::flush::worker`] so both
/// sides address the same physical keys.
pub(crate) const MD_TAG: &str = "md";
