//! Bidirectional local-ino <-> remote-ino table (§4.1).
//!
//! The mapping is a partial bijection: once a non-root local id is inserted
//! it is persisted and immutable for the life of the mount. A single coarse
//! lock covers both directions; every operation is expected to be
//! short-running, the KV put inside `insert` being the only I/O.

use crate::kv::{Key, KvStore};
use crate::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::trace;

const VMAP_TAG: &str = "vmap";

struct Inner {
    fwd: HashMap<u64, u64>,
    bwd: HashMap<u64, u64>,
}

/// Bidirectional local<->remote inode table.
pub struct VMap {
    inner: Mutex<Inner>,
    kv: Arc<dyn KvStore>,
}

impl VMap {
    /// construct an empty table backed by `kv` for the forward-direction spill.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        VMap {
            inner: Mutex::new(Inner {
                fwd: HashMap::new(),
                bwd: HashMap::new(),
            }),
            kv,
        }
    }

    /// insert the pair `(local, remote)`. A no-op if already present under
    /// the same local id. If `remote` was previously owned by a different
    /// local id, that stale pairing is purged first. Persisted to KVStore
    /// unless `local == 1` (the root, which is never spilled).
    pub fn insert(&self, local: u64, remote: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();

        if inner.fwd.get(&local) == Some(&remote) {
            return Ok(());
        }

        if let Some(&stale_local) = inner.bwd.get(&remote) {
            if stale_local != local {
                inner.fwd.remove(&stale_local);
            }
        }
        if let Some(old_remote) = inner.fwd.insert(local, remote) {
            inner.bwd.remove(&old_remote);
        }
        inner.bwd.insert(remote, local);

        if local != 1 {
            self.kv
                .put(&Key::Tagged(VMAP_TAG, local), &remote.to_be_bytes())?;
        }

        trace!(local, remote, "vmap insert");
        Ok(())
    }

    /// forward lookup, falling back to the KVStore on a cache miss. Returns
    /// `0` ("not yet known upstream") if absent in both places.
    pub fn forward(&self, local: u64) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&remote) = inner.fwd.get(&local) {
            return remote;
        }
        if local == 1 {
            return 0;
        }

        match self.kv.get(&Key::Tagged(VMAP_TAG, local)) {
            Ok(Some(bytes)) if bytes.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                let remote = u64::from_be_bytes(buf);
                inner.fwd.insert(local, remote);
                inner.bwd.insert(remote, local);
                remote
            }
            _ => 0,
        }
    }

    /// backward lookup; in-memory only, never falls back to the KVStore.
    pub fn backward(&self, remote: u64) -> u64 {
        let inner = self.inner.lock().unwrap();
        *inner.bwd.get(&remote).unwrap_or(&0)
    }

    /// remove the pair keyed by its local id, if present.
    pub fn erase_fwd(&self, local: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(remote) = inner.fwd.remove(&local) {
            inner.bwd.remove(&remote);
        }
    }

    /// remove the pair keyed by its remote id, if present.
    pub fn erase_bwd(&self, remote: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(local) = inner.bwd.remove(&remote) {
            inner.fwd.remove(&local);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::NoopKvStore;

    fn vmap() -> VMap {
        VMap::new(Arc::new(NoopKvStore))
    }

    #[test]
    fn forward_and_backward_agree() {
        let v = vmap();
        v.insert(2, 100).unwrap();
        assert_eq!(v.forward(2), 100);
        assert_eq!(v.backward(100), 2);
    }

    #[test]
    fn reinserting_remote_under_new_local_purges_the_old_local() {
        let v = vmap();
        v.insert(2, 100).unwrap();
        v.insert(3, 100).unwrap();
        assert_eq!(v.forward(2), 0);
        assert_eq!(v.forward(3), 100);
        assert_eq!(v.backward(100), 3);
    }

    #[test]
    fn unknown_local_or_remote_is_zero() {
        let v = vmap();
        assert_eq!(v.forward(42), 0);
        assert_eq!(v.backward(42), 0);
    }

    #[test]
    fn root_is_never_spilled_but_still_forwards() {
        let v = vmap();
        v.insert(1, 1).unwrap();
        assert_eq!(v.forward(1), 1);
    }

    #[test]
    fn erase_removes_both_directions() {
        let v = vmap();
        v.insert(2, 100).unwrap();
        v.erase_fwd(2);
        assert_eq!(v.forward(2), 0);
        assert_eq!(v.backward(100), 0);
    }

    #[test]
    fn forward_recovers_from_kv_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        let kv: Arc<dyn KvStore> = Arc::new(crate::kv::SledKvStore::open(dir.path()).unwrap());
        let v1 = VMap::new(kv.clone());
        v1.insert(2, 100).unwrap();

        // fresh in-memory table, same KVStore: simulates a restart.
        let v2 = VMap::new(kv);
        assert_eq!(v2.forward(2), 100);
        assert_eq!(v2.backward(100), 2);
    }
}
