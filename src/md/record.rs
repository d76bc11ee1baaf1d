//! The in-memory MD record: the unit the metadata cache stores one of per
//! local-ino (§3).

use std::collections::{BTreeMap, HashMap, HashSet};

/// nanosecond-precision wall-clock timestamp, as carried on the wire and in
/// the MD record's four timestamp fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Timespec {
    /// seconds since the epoch.
    pub sec: i64,
    /// nanoseconds within the second.
    pub nsec: u32,
}

impl Timespec {
    /// the current wall-clock time, truncated to the precision this crate
    /// carries on the wire.
    pub fn now() -> Self {
        let since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Timespec {
            sec: since_epoch.as_secs() as i64,
            nsec: since_epoch.subsec_nanos(),
        }
    }

    /// `self + duration`, used to compute a lease's `vtime` from a grant
    /// time and the configured lease length.
    pub fn plus(&self, duration: std::time::Duration) -> Self {
        let nsec = self.nsec as u64 + duration.subsec_nanos() as u64;
        Timespec {
            sec: self.sec + duration.as_secs() as i64 + (nsec / 1_000_000_000) as i64,
            nsec: (nsec % 1_000_000_000) as u32,
        }
    }
}

/// children-listing / creation-confirmation state of an MD record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MdType {
    /// never populated.
    None,
    /// normal, populated record.
    Md,
    /// `local_children` is a current listing.
    MdLs,
    /// created locally, not yet confirmed upstream.
    Excl,
}

/// last pending action queued for this inode in the flush queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MdOp {
    /// nothing pending.
    None,
    /// creation pending.
    Add,
    /// attribute update pending.
    Update,
    /// removal pending.
    Rm,
    /// listing spill to the KVStore pending (no upstream call).
    LStore,
}

/// one MD record: the unit of the metadata cache.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MdRecord {
    // identity & link shape
    /// the local-ino the kernel was handed for this record.
    pub local_ino: u64,
    /// the remote-ino the MD server uses; `0` if not yet known.
    pub remote_ino: u64,
    /// parent's local-ino.
    pub parent_local: u64,
    /// parent's remote-ino.
    pub parent_remote: u64,
    /// the entry's name within its parent.
    pub name: String,

    // POSIX attributes
    /// file mode bits (type + permission).
    pub mode: u32,
    /// owning uid.
    pub uid: u32,
    /// owning gid.
    pub gid: u32,
    /// size in bytes.
    pub size: u64,
    /// last-access time.
    pub atime: Timespec,
    /// last-modification time.
    pub mtime: Timespec,
    /// last-status-change time.
    pub ctime: Timespec,
    /// creation time.
    pub btime: Timespec,
    /// hard-link count.
    pub nlink: u32,
    /// symlink target, if this is a symlink.
    pub target: Option<String>,
    /// extended attributes.
    pub xattr: HashMap<String, Vec<u8>>,
    /// opaque flag bits passed through from the server.
    pub flags: u32,

    // bookkeeping
    /// children-listing / creation-confirmation state.
    pub ty: MdType,
    /// pending flush-queue action for this record.
    pub op: MdOp,
    /// outstanding kernel references (`lookup`/`forget` balance).
    pub lookup_count: u64,
    /// number of caps currently referring to this inode.
    pub cap_count: u64,
    /// number of open directory handles.
    pub opendir_count: u64,
    /// name -> local-ino, meaningful only when `ty == MdLs`.
    pub local_children: BTreeMap<String, u64>,
    /// names known to be absent (negative cache).
    pub local_enoent: HashSet<String>,
    /// name -> local-ino pending removal upstream.
    pub todelete: HashMap<String, u64>,
    /// set when this client created the inode and the server has not yet
    /// acknowledged it.
    pub creator: bool,
    /// last per-record error, observed by `wait_flush` callers.
    pub err: i32,
    /// set once the record has been unlinked locally.
    pub deleted: bool,
}

impl MdRecord {
    /// a freshly-minted record for `local_ino`, not yet populated from
    /// anywhere; callers fill in attributes as they become known.
    pub fn new(local_ino: u64, parent_local: u64, name: String) -> Self {
        MdRecord {
            local_ino,
            remote_ino: 0,
            parent_local,
            parent_remote: 0,
            name,
            mode: 0,
            uid: 0,
            gid: 0,
            size: 0,
            atime: Timespec::default(),
            mtime: Timespec::default(),
            ctime: Timespec::default(),
            btime: Timespec::default(),
            nlink: 1,
            target: None,
            xattr: HashMap::new(),
            flags: 0,
            ty: MdType::None,
            op: MdOp::None,
            lookup_count: 0,
            cap_count: 0,
            opendir_count: 0,
            local_children: BTreeMap::new(),
            local_enoent: HashSet::new(),
            todelete: HashMap::new(),
            creator: false,
            err: 0,
            deleted: false,
        }
    }

    /// whether this record currently carries a current children listing.
    pub fn is_listing(&self) -> bool {
        self.ty == MdType::MdLs
    }

    /// the wire representation of this record's current attributes, as
    /// carried in a `putMD` request by the flush worker (§4.6).
    pub fn to_wire(&self) -> crate::backend::MdWire {
        crate::backend::MdWire {
            remote_ino: self.remote_ino,
            remote_parent: self.parent_remote,
            name: self.name.clone(),
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            size: self.size,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            btime: self.btime,
            nlink: self.nlink,
            target: self.target.clone(),
            xattr: self.xattr.clone(),
            flags: self.flags,
            cap: None,
        }
    }
}
