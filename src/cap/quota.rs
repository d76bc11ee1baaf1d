//! Per-`(uid, gid, quota-node)` accounting shared across every cap scoped to
//! that node (§4.4).

use super::record::Cap;
use crate::md::record::Timespec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// one quota accounting record.
#[derive(Debug, Clone)]
pub struct QuotaRecord {
    /// owning uid.
    pub uid: u32,
    /// owning gid.
    pub gid: u32,
    /// remote-ino of the quota node this record is scoped to.
    pub quota_node: u64,
    /// server-reported byte ceiling.
    pub max_volume: u64,
    /// server-reported inode ceiling.
    pub max_inodes: u64,
    /// locally-accounted byte delta not yet confirmed by a refresh.
    pub local_volume: i64,
    /// locally-accounted inode-count delta not yet confirmed by a refresh.
    pub local_inode: i64,
    /// lease time of the cap this record was last refreshed from.
    pub vtime: Timespec,
    /// set once a write has been rejected with `EDQUOT`; short-circuits
    /// subsequent writes without a round trip.
    pub volume_edquota: bool,
}

impl QuotaRecord {
    fn new(uid: u32, gid: u32, quota_node: u64) -> Self {
        QuotaRecord {
            uid,
            gid,
            quota_node,
            max_volume: 0,
            max_inodes: 0,
            local_volume: 0,
            local_inode: 0,
            vtime: Timespec::default(),
            volume_edquota: false,
        }
    }

    /// bytes remaining under the currently-known limit, after local deltas,
    /// that would still be available if `required` more bytes were booked.
    pub fn has_quota(&self, required: u64) -> bool {
        if self.volume_edquota {
            return false;
        }
        if self.max_volume == 0 {
            // no limit reported by the server.
            return true;
        }
        let used = self.local_volume.max(0) as u64;
        used.saturating_add(required) <= self.max_volume
    }

    /// record `n` bytes as locally written, not yet confirmed upstream.
    pub fn book_volume(&mut self, n: u64) {
        self.local_volume += n as i64;
    }

    /// release `n` previously-booked bytes (e.g. on truncate or unlink).
    pub fn free_volume(&mut self, n: u64) {
        self.local_volume -= n as i64;
    }

    /// record one inode as locally created, not yet confirmed upstream.
    pub fn book_inode(&mut self) {
        self.local_inode += 1;
    }

    /// release one previously-booked inode.
    pub fn free_inode(&mut self) {
        self.local_inode -= 1;
    }

    /// mark the volume quota exhausted; subsequent writes fail fast.
    pub fn set_volume_edquota(&mut self) {
        self.volume_edquota = true;
    }

    fn refresh_from_cap(&mut self, cap: &Cap) {
        self.max_volume = cap.quota_max_volume;
        self.max_inodes = cap.quota_max_inodes;
        self.vtime = cap.vtime;
        self.local_volume = 0;
        self.local_inode = 0;
        self.volume_edquota = false;
    }
}

/// shared handle to one quota record; every accounting call takes this
/// record's own lock, never the store's.
pub type QuotaHandle = Arc<Mutex<QuotaRecord>>;

/// the per-`(uid, gid, quota-node)` quota table.
pub struct QuotaStore {
    table: Mutex<HashMap<(u32, u32, u64), QuotaHandle>>,
}

impl QuotaStore {
    /// an empty quota table.
    pub fn new() -> Self {
        QuotaStore {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// the quota record for `cap`'s `(uid, gid, quota_node)` fingerprint,
    /// creating it if absent. If `cap`'s lease is strictly newer than the
    /// record's, the record is refreshed from the cap's embedded quota
    /// payload and its local accounting deltas are zeroed.
    pub fn get(&self, cap: &Cap) -> QuotaHandle {
        let key = (cap.uid, cap.gid, cap.quota_node);
        let handle = {
            let mut table = self.table.lock().unwrap();
            table
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(QuotaRecord::new(cap.uid, cap.gid, cap.quota_node))))
                .clone()
        };

        let mut record = handle.lock().unwrap();
        if cap.vtime > record.vtime {
            debug!(uid = cap.uid, gid = cap.gid, node = cap.quota_node, "refreshing quota from cap");
            record.refresh_from_cap(cap);
        }
        drop(record);
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap::record::Cap;

    fn cap_with(uid: u32, gid: u32, node: u64, max_volume: u64, vtime_sec: i64) -> Cap {
        let mut cap = Cap::new(2, uid, gid, "client".into());
        cap.quota_node = node;
        cap.quota_max_volume = max_volume;
        cap.vtime = Timespec { sec: vtime_sec, nsec: 0 };
        cap
    }

    #[test]
    fn get_creates_and_then_reuses_the_same_record() {
        let store = QuotaStore::new();
        let cap = cap_with(1000, 1000, 42, 1_000_000, 10);
        let a = store.get(&cap);
        let b = store.get(&cap);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn booking_and_exhaustion() {
        let store = QuotaStore::new();
        let cap = cap_with(1000, 1000, 42, 1_048_576, 10);
        let handle = store.get(&cap);

        {
            let mut q = handle.lock().unwrap();
            assert!(q.has_quota(512 * 1024));
            q.book_volume(512 * 1024);
        }

        let mut q = handle.lock().unwrap();
        assert!(!q.has_quota(600 * 1024));
        q.set_volume_edquota();
        assert!(!q.has_quota(1));
    }

    #[test]
    fn newer_cap_refreshes_and_zeroes_local_deltas() {
        let store = QuotaStore::new();
        let first = cap_with(1000, 1000, 42, 1_048_576, 10);
        let handle = store.get(&first);
        handle.lock().unwrap().book_volume(1024);

        let second = cap_with(1000, 1000, 42, 2_097_152, 20);
        let handle2 = store.get(&second);
        assert!(Arc::ptr_eq(&handle, &handle2));

        let q = handle2.lock().unwrap();
        assert_eq!(q.local_volume, 0);
        assert_eq!(q.max_volume, 2_097_152);
    }
}
