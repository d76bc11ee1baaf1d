//! The capability map (§4.3): caps keyed by their composed `capid`, plus the
//! revocation set that rejects late-arriving updates for a forgotten
//! auth-id.

use super::record::{Cap, CapIdentity};
use crate::backend::{Backend, CapWire, Frame, Request};
use crate::error::MdErrorKind;
use crate::md::record::Timespec;
use crate::md::MdCache;
use crate::req::RequestCtx;
use crate::vmap::VMap;
use crate::Result;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// the capability map. `MdCache` is passed by reference to every call that
/// needs to adjust a record's `cap-count`, never stored, mirroring the
/// `MdCache` side of the same design choice (§9).
pub struct CapStore {
    identity: CapIdentity,
    lease_time: Duration,
    map: Mutex<HashMap<String, Arc<Mutex<Cap>>>>,
    revoked: Mutex<HashSet<String>>,
}

impl CapStore {
    /// an empty cap table for this mount instance's identity.
    pub fn new(identity: CapIdentity, lease_time: Duration) -> Self {
        CapStore {
            identity,
            lease_time,
            map: Mutex::new(HashMap::new()),
            revoked: Mutex::new(HashSet::new()),
        }
    }

    fn capid(&self, local_ino: u64, uid: u32, gid: u32) -> String {
        self.identity.capid(local_ino, uid, gid)
    }

    /// §4.3 `get`: the cap for this fingerprint, minting an invalid
    /// placeholder if absent.
    pub fn get(&self, req: &RequestCtx, local_ino: u64) -> Arc<Mutex<Cap>> {
        let capid = self.capid(local_ino, req.uid, req.gid);
        self.map
            .lock()
            .unwrap()
            .entry(capid)
            .or_insert_with(|| Arc::new(Mutex::new(Cap::new(local_ino, req.uid, req.gid, req.client_id.clone()))))
            .clone()
    }

    /// §4.3 `acquire`: `get`, refreshing via the Backend if not currently
    /// valid, then testing whether the (possibly refreshed) cap satisfies
    /// `mode`.
    pub fn acquire(
        &self,
        req: &RequestCtx,
        local_ino: u64,
        mode: u32,
        vmap: &VMap,
        backend: &dyn Backend,
        md: &MdCache,
    ) -> Result<Arc<Mutex<Cap>>> {
        let cap = self.get(req, local_ino);
        let now = Timespec::now();

        let valid_now = cap.lock().unwrap().valid(now);
        if !valid_now {
            self.refresh(req, &cap, local_ino, vmap, backend, md)?;
        }

        let mut guard = cap.lock().unwrap();
        let satisfies = guard.satisfy(mode) && guard.valid(Timespec::now());
        guard.errc = if satisfies { 0 } else { MdErrorKind::Permission.errno() };
        guard.last_use = Timespec::now();
        drop(guard);
        Ok(cap)
    }

    /// §4.3 `refresh`: synchronous `getCAP` round trip.
    pub fn refresh(
        &self,
        req: &RequestCtx,
        cap: &Arc<Mutex<Cap>>,
        local_ino: u64,
        vmap: &VMap,
        backend: &dyn Backend,
        md: &MdCache,
    ) -> Result<()> {
        let remote_ino = vmap.forward(local_ino);
        if remote_ino == 0 {
            return Err(MdErrorKind::Protocol.into());
        }

        let response = backend.call(Request::GetCap { remote_ino })?;
        match response {
            Frame::Cap(capwire) => {
                if vmap.backward(capwire.id) != local_ino {
                    warn!(local_ino, reported = capwire.id, "getCAP answered for a different inode");
                    cap.lock().unwrap().errc = MdErrorKind::Protocol.errno();
                    return Err(MdErrorKind::Protocol.into());
                }
                let _ = req;
                self.store(local_ino, capwire, md);
                Ok(())
            }
            Frame::Errno(e) => {
                cap.lock().unwrap().errc = e;
                Err(MdErrorKind::from_errno(e).into())
            }
            _ => Err(MdErrorKind::Protocol.into()),
        }
    }

    /// §4.3 `store`: install a cap authoritatively, from a `refresh` or from
    /// an `MdCache::apply` that found one piggy-backed on an `MD` response.
    pub fn store(&self, local_ino: u64, capwire: CapWire, md: &MdCache) -> Arc<Mutex<Cap>> {
        let capid = self.capid(local_ino, capwire.uid, capwire.gid);
        let mut map = self.map.lock().unwrap();
        let handle = map
            .entry(capid)
            .or_insert_with(|| Arc::new(Mutex::new(Cap::new(local_ino, capwire.uid, capwire.gid, capwire.client_id.clone()))))
            .clone();
        drop(map);

        // a placeholder minted by `get` (§4.3) has never been attached to the
        // MD record's `cap-count`, regardless of whether the key already
        // existed in the map; key presence alone can't tell a freshly
        // refreshed placeholder from a genuinely new cap.
        let was_placeholder = handle.lock().unwrap().vtime == Timespec::default();

        {
            let mut c = handle.lock().unwrap();
            c.local_ino = local_ino;
            c.client_id = capwire.client_id;
            c.auth_id = capwire.auth_id;
            c.mode = capwire.mode;
            c.vtime = capwire.vtime;
            c.quota_node = capwire.quota_node;
            c.quota_max_volume = capwire.quota.max_volume;
            c.quota_max_inodes = capwire.quota.max_inodes;
            c.max_file_size = capwire.max_file_size;
            c.errc = capwire.error_code;
        }

        if was_placeholder {
            md.increment_cap_count(local_ino);
            debug!(local_ino, "cap attached");
        }
        handle
    }

    /// §4.3 `imply`: derive a cap for a newly created child from its
    /// parent's cap. The parent's mode mask is propagated unchanged (see
    /// DESIGN.md Open Question), not narrowed to `requested_mode`.
    pub fn imply(
        &self,
        parent_cap: &Arc<Mutex<Cap>>,
        imply_auth: &str,
        requested_mode: u32,
        new_local_ino: u64,
        md: &MdCache,
    ) -> Arc<Mutex<Cap>> {
        let _ = requested_mode;
        let parent = parent_cap.lock().unwrap().clone();
        let mut child = parent.clone();
        child.local_ino = new_local_ino;
        child.auth_id = imply_auth.to_string();
        child.vtime = parent.vtime.plus(self.lease_time);

        let capid = self.capid(new_local_ino, child.uid, child.gid);
        let handle = Arc::new(Mutex::new(child));
        self.map.lock().unwrap().insert(capid, handle.clone());
        md.increment_cap_count(new_local_ino);
        handle
    }

    /// §4.3 `forget`: remove the cap, record its auth-id as revoked, and
    /// return the inode it covered so the caller can invalidate it.
    pub fn forget(&self, capid: &str, md: &MdCache) -> Option<u64> {
        let removed = self.map.lock().unwrap().remove(capid)?;
        let cap = removed.lock().unwrap();
        self.revoked.lock().unwrap().insert(cap.auth_id.clone());
        md.decrement_cap_count(cap.local_ino);
        Some(cap.local_ino)
    }

    /// §4.3 `reset`: drop every cap, revoking every auth-id seen.
    pub fn reset(&self, md: &MdCache) {
        let mut map = self.map.lock().unwrap();
        let mut revoked = self.revoked.lock().unwrap();
        for (_, cap) in map.drain() {
            let cap = cap.lock().unwrap();
            revoked.insert(cap.auth_id.clone());
            md.decrement_cap_count(cap.local_ino);
        }
    }

    /// whether `auth_id` was already revoked and must reject late updates.
    pub fn is_revoked(&self, auth_id: &str) -> bool {
        self.revoked.lock().unwrap().contains(auth_id)
    }

    /// number of live caps, for the heartbeat statistics block (§4.8).
    pub fn live_count(&self) -> u64 {
        self.map.lock().unwrap().len() as u64
    }

    /// look up a live cap directly by its composed id, for `MessagePump`'s
    /// `LEASE` handling (§4.8), which is handed `(remote_ino, client_id)`
    /// rather than a `RequestCtx`.
    pub fn find_by_fingerprint(&self, local_ino: u64, client_id: &str) -> Option<(String, Arc<Mutex<Cap>>)> {
        let map = self.map.lock().unwrap();
        map.iter()
            .find(|(_, cap)| {
                let c = cap.lock().unwrap();
                c.local_ino == local_ino && c.client_id == client_id
            })
            .map(|(id, cap)| (id.clone(), cap.clone()))
    }

    /// a point-in-time snapshot of every live cap, for the sweeper to scan
    /// without holding the map lock for the duration (§4.3 Open Question).
    pub fn snapshot(&self) -> Vec<(String, Arc<Mutex<Cap>>)> {
        self.map
            .lock()
            .unwrap()
            .iter()
            .map(|(id, cap)| (id.clone(), cap.clone()))
            .collect()
    }

    /// remove exactly the caps named by `expired_ids`, decrementing each
    /// one's MD `cap-count`. Used by the sweeper after it has identified
    /// expired ids from its snapshot.
    pub fn remove_expired(&self, expired_ids: &[String], md: &MdCache) -> Vec<u64> {
        let mut map = self.map.lock().unwrap();
        let mut inos = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            if let Some(cap) = map.remove(id) {
                let cap = cap.lock().unwrap();
                inos.push(cap.local_ino);
                md.decrement_cap_count(cap.local_ino);
            }
        }
        inos
    }
}

impl Clone for Cap {
    fn clone(&self) -> Self {
        Cap {
            local_ino: self.local_ino,
            uid: self.uid,
            gid: self.gid,
            client_id: self.client_id.clone(),
            auth_id: self.auth_id.clone(),
            mode: self.mode,
            vtime: self.vtime,
            quota_node: self.quota_node,
            quota_max_volume: self.quota_max_volume,
            quota_max_inodes: self.quota_max_inodes,
            errc: self.errc,
            max_file_size: self.max_file_size,
            last_use: self.last_use,
        }
    }
}
