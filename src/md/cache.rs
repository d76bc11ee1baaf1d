//! The authoritative in-memory MD cache (§4.5): `MdRecord`s keyed by
//! local-ino, each behind its own lock, with a condition variable per record
//! for flush completion.

use super::record::{MdOp, MdRecord, MdType};
use super::MD_TAG;
use crate::backend::{Backend, Frame, Request};
use crate::cap::CapStore;
use crate::error::MdErrorKind;
use crate::flush::{FlushEntry, FlushQueue};
use crate::kv::{Key, KvStore};
use crate::vmap::VMap;
use crate::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

/// the root's fixed local-ino; never reused or spilled.
const ROOT_LOCAL_INO: u64 = 1;

/// one MD record plus the condition variable flush-worker completion is
/// signalled on. `lock()` is the single entry point every mutator uses;
/// lock-ordering across records is the caller's responsibility (§5).
pub struct MdHandle {
    record: Mutex<MdRecord>,
    flush_done: Condvar,
}

impl MdHandle {
    fn new(record: MdRecord) -> Self {
        MdHandle {
            record: Mutex::new(record),
            flush_done: Condvar::new(),
        }
    }

    /// acquire this record's lock.
    pub fn lock(&self) -> MutexGuard<'_, MdRecord> {
        self.record.lock().unwrap()
    }

    /// wake any `wait_flush` callers after the worker transitions `op` back
    /// to `None`.
    pub fn notify_flush_done(&self) {
        self.flush_done.notify_all();
    }

    /// block until `op == MdOp::None`, returning the record's last error.
    fn wait_for_flush(&self) -> i32 {
        let mut guard = self.record.lock().unwrap();
        while guard.op != MdOp::None {
            guard = self.flush_done.wait(guard).unwrap();
        }
        guard.err
    }
}

/// attributes for a freshly-created entry, as passed to `add`/`add_sync` by
/// `create`/`mkdir`/`symlink`/`link`.
#[derive(Debug, Clone)]
pub struct NewEntryAttrs {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub target: Option<String>,
}

/// the shared MD-record table plus its collaborators. `CapStore` is passed
/// in by reference to each call that needs it rather than stored as a
/// field, so this type and `CapStore` never form an `Arc` reference cycle
/// (§9 design note).
pub struct MdCache {
    table: Mutex<HashMap<u64, Arc<MdHandle>>>,
    next_local: AtomicU64,
    vmap: Arc<VMap>,
    kv: Arc<dyn KvStore>,
    flush: Arc<FlushQueue>,
    backend: Arc<dyn Backend>,
}

impl MdCache {
    /// an empty cache over the given collaborators. The root record is
    /// seeded lazily on first `get(1, ..)`.
    pub fn new(
        vmap: Arc<VMap>,
        kv: Arc<dyn KvStore>,
        flush: Arc<FlushQueue>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        MdCache {
            table: Mutex::new(HashMap::new()),
            next_local: AtomicU64::new(ROOT_LOCAL_INO + 1),
            vmap,
            kv,
            flush,
            backend,
        }
    }

    fn alloc_local_ino(&self) -> u64 {
        self.next_local.fetch_add(1, Ordering::SeqCst)
    }

    /// look up a record already resident in the table, without touching
    /// KVStore or the Backend.
    pub fn peek(&self, local_ino: u64) -> Option<Arc<MdHandle>> {
        self.table.lock().unwrap().get(&local_ino).cloned()
    }

    fn insert_handle(&self, local_ino: u64, record: MdRecord) -> Arc<MdHandle> {
        let mut table = self.table.lock().unwrap();
        table
            .entry(local_ino)
            .or_insert_with(|| Arc::new(MdHandle::new(record)))
            .clone()
    }

    /// an embedded-cap attach increases the referenced record's `cap-count`.
    pub fn increment_cap_count(&self, local_ino: u64) {
        if let Some(h) = self.peek(local_ino) {
            h.lock().cap_count += 1;
        }
    }

    /// a cap detach (forget, revocation, sweep) decrements it back.
    pub fn decrement_cap_count(&self, local_ino: u64) {
        if let Some(h) = self.peek(local_ino) {
            let mut r = h.lock();
            r.cap_count = r.cap_count.saturating_sub(1);
        }
    }

    /// remove `local_ino` from the table unconditionally. Used by the flush
    /// worker once an `RM` has landed and the record has no outstanding
    /// lookup references left.
    pub(crate) fn purge(&self, local_ino: u64) {
        self.table.lock().unwrap().remove(&local_ino);
    }

    /// number of records currently resident, for the heartbeat statistics
    /// block (§4.8).
    pub fn cached_count(&self) -> u64 {
        self.table.lock().unwrap().len() as u64
    }

    /// whether `local_ino` denotes a directory, for callers (the sweeper,
    /// `KernelNotify`) that need to pick between file/entry invalidation.
    pub fn is_dir(&self, local_ino: u64) -> bool {
        const S_IFMT: u32 = 0o170_000;
        const S_IFDIR: u32 = 0o040_000;
        self.peek(local_ino)
            .map(|h| h.lock().mode & S_IFMT == S_IFDIR)
            .unwrap_or(false)
    }

    fn load_from_kv(&self, local_ino: u64) -> Result<Option<Arc<MdHandle>>> {
        let bytes = match self.kv.get(&Key::Tagged(MD_TAG, local_ino))? {
            Some(b) => b,
            None => return Ok(None),
        };
        let record: MdRecord = serde_json::from_slice(&bytes)?;
        let children: Vec<u64> = record.local_children.values().copied().collect();
        let handle = self.insert_handle(local_ino, record);
        for child_local in children {
            if self.peek(child_local).is_none() {
                // best-effort: a missing child blob just means it will be
                // refreshed from the Backend on its own `get`.
                let _ = self.load_from_kv(child_local);
            }
        }
        Ok(Some(handle))
    }

    fn is_stale(&self, handle: &Arc<MdHandle>, listing: bool) -> bool {
        let (ty, self_cap, parent_local) = {
            let r = handle.lock();
            (r.ty, r.cap_count > 0, r.parent_local)
        };
        if listing && ty != MdType::MdLs {
            return true;
        }
        if ty == MdType::None {
            return true;
        }
        let parent_cap = self
            .peek(parent_local)
            .map(|p| p.lock().cap_count > 0)
            .unwrap_or(false);
        !self_cap && !parent_cap
    }

    /// §4.5 `lookup`: answer from the parent's listing without an upstream
    /// call when the parent holds a cap; otherwise delegate to `get`.
    pub fn lookup(&self, caps: &CapStore, parent_local: u64, name: &str) -> Result<Arc<MdHandle>> {
        if let Some(parent) = self.peek(parent_local) {
            let (has_cap, is_listing, child, already_enoent) = {
                let r = parent.lock();
                (
                    r.cap_count > 0,
                    r.ty == MdType::MdLs,
                    r.local_children.get(name).copied(),
                    r.local_enoent.contains(name),
                )
            };
            if has_cap {
                if let Some(child_local) = child {
                    if let Some(h) = self.peek(child_local) {
                        trace!(parent_local, name, "lookup served from local-children");
                        return Ok(h);
                    }
                }
                if is_listing {
                    if !already_enoent {
                        parent.lock().local_enoent.insert(name.to_string());
                    }
                    return Err(MdErrorKind::NotFound.into());
                }
            }
        }
        self.get_by_name(caps, parent_local, name)
    }

    /// §4.5 `get`: cache hit, else KVStore, else Backend, subject to the
    /// staleness test (`is_stale`).
    pub fn get(&self, caps: &CapStore, local_ino: u64, listing: bool) -> Result<Arc<MdHandle>> {
        if let Some(handle) = self.peek(local_ino) {
            if !self.is_stale(&handle, listing) {
                return Ok(handle);
            }
        } else if let Some(handle) = self.load_from_kv(local_ino)? {
            if !self.is_stale(&handle, listing) {
                return Ok(handle);
            }
        }
        self.fetch_from_backend(caps, local_ino, listing)
    }

    fn fetch_from_backend(&self, caps: &CapStore, local_ino: u64, _listing: bool) -> Result<Arc<MdHandle>> {
        let remote = self.vmap.forward(local_ino);
        let response = if local_ino == ROOT_LOCAL_INO && remote == 0 {
            self.backend.call(Request::GetMdRoot)?
        } else if remote == 0 {
            return Err(MdErrorKind::Protocol.into());
        } else {
            let clock = self
                .peek(local_ino)
                .map(|h| h.lock().mtime)
                .unwrap_or_default();
            self.backend
                .call(Request::GetMdConditional { remote_ino: remote, clock })?
        };
        self.apply(caps, response)?;
        self.peek(local_ino).ok_or_else(|| MdErrorKind::Protocol.into())
    }

    fn get_by_name(&self, caps: &CapStore, parent_local: u64, name: &str) -> Result<Arc<MdHandle>> {
        let remote_parent = self.peek(parent_local).map(|h| h.lock().remote_ino).unwrap_or(0);
        let response = self.backend.call(Request::GetMdByParentName {
            remote_parent,
            name: name.to_string(),
        })?;
        if let Frame::Errno(e) = &response {
            if *e != 0 {
                return Err(MdErrorKind::from_errno(*e).into());
            }
        }
        self.apply(caps, response)?;
        if let Some(parent) = self.peek(parent_local) {
            if let Some(&child_local) = parent.lock().local_children.get(name) {
                return self.peek(child_local).ok_or_else(|| MdErrorKind::Protocol.into());
            }
        }
        Err(MdErrorKind::NotFound.into())
    }

    /// §4.5 `apply`: integrate one Backend response into the cache.
    pub fn apply(&self, caps: &CapStore, frame: Frame) -> Result<()> {
        match frame {
            Frame::Md(mw) => {
                self.apply_one(caps, mw)?;
                Ok(())
            }
            Frame::MdMap(map) => self.apply_listing(caps, map),
            Frame::Errno(0) => Ok(()),
            Frame::Errno(e) => Err(MdErrorKind::from_errno(e).into()),
            _ => Err(MdErrorKind::Protocol.into()),
        }
    }

    fn resolve_or_mint(&self, remote_ino: u64) -> Result<u64> {
        if remote_ino == 0 {
            return Ok(ROOT_LOCAL_INO);
        }
        let existing = self.vmap.backward(remote_ino);
        if existing != 0 {
            return Ok(existing);
        }
        let local = self.alloc_local_ino();
        self.vmap.insert(local, remote_ino)?;
        Ok(local)
    }

    fn apply_one(&self, caps: &CapStore, mw: crate::backend::MdWire) -> Result<u64> {
        let local = self.resolve_or_mint(mw.remote_ino)?;
        let parent_local = self.resolve_or_mint(mw.remote_parent)?;

        let handle = self
            .peek(local)
            .unwrap_or_else(|| self.insert_handle(local, MdRecord::new(local, parent_local, mw.name.clone())));

        {
            let mut r = handle.lock();
            r.remote_ino = mw.remote_ino;
            r.parent_local = parent_local;
            r.parent_remote = mw.remote_parent;
            r.name = mw.name.clone();
            r.mode = mw.mode;
            r.uid = mw.uid;
            r.gid = mw.gid;
            r.size = mw.size;
            r.atime = mw.atime;
            r.mtime = mw.mtime;
            r.ctime = mw.ctime;
            r.btime = mw.btime;
            r.nlink = mw.nlink;
            r.target = mw.target.clone();
            r.xattr = mw.xattr.clone();
            r.flags = mw.flags;
            if r.ty == MdType::None {
                r.ty = MdType::Md;
            }
            r.op = MdOp::LStore;
        }

        if let Some(parent) = self.peek(parent_local) {
            parent.lock().local_children.insert(mw.name.clone(), local);
        }

        self.flush.push(
            local,
            FlushEntry {
                auth_id: String::new(),
                op: MdOp::LStore,
            },
            true,
        );

        if let Some(cap) = mw.cap {
            caps.store(local, cap, self);
        }

        Ok(local)
    }

    fn apply_listing(&self, caps: &CapStore, map: crate::backend::MdMapWire) -> Result<()> {
        let parent_local = self.resolve_or_mint(map.reference_ino)?;

        let mut children_map = BTreeMap::new();
        for (name, mut child) in map.children {
            child.name = name.clone();
            let local = self.apply_one(caps, child)?;
            children_map.insert(name, local);
        }

        let handle = self
            .peek(parent_local)
            .unwrap_or_else(|| self.insert_handle(parent_local, MdRecord::new(parent_local, parent_local, String::new())));
        {
            let mut r = handle.lock();
            r.local_children = children_map;
            r.ty = MdType::MdLs;
            r.op = MdOp::LStore;
        }

        self.flush.push(
            parent_local,
            FlushEntry {
                auth_id: String::new(),
                op: MdOp::LStore,
            },
            true,
        );
        Ok(())
    }

    /// §4.5 `add`: insert `name` into `parent`'s listing and enqueue its
    /// upstream creation.
    pub fn add(&self, parent_local: u64, name: &str, attrs: NewEntryAttrs, auth_id: &str) -> Arc<MdHandle> {
        let child_local = self.alloc_local_ino();
        let parent_remote = self.peek(parent_local).map(|h| h.lock().remote_ino).unwrap_or(0);

        let mut record = MdRecord::new(child_local, parent_local, name.to_string());
        record.mode = attrs.mode;
        record.uid = attrs.uid;
        record.gid = attrs.gid;
        record.target = attrs.target;
        record.parent_remote = parent_remote;
        record.ty = MdType::Excl;
        record.op = MdOp::Add;
        record.creator = true;
        record.lookup_count = 1;
        let handle = self.insert_handle(child_local, record);

        if let Some(parent) = self.peek(parent_local) {
            let mut p = parent.lock();
            p.local_children.insert(name.to_string(), child_local);
            p.op = MdOp::LStore;
        }
        self.flush.push(
            parent_local,
            FlushEntry {
                auth_id: auth_id.to_string(),
                op: MdOp::LStore,
            },
            false,
        );
        self.flush.push(
            child_local,
            FlushEntry {
                auth_id: auth_id.to_string(),
                op: MdOp::Add,
            },
            false,
        );

        debug!(parent_local, child_local, name, "add: entry created locally");
        handle
    }

    /// §4.5 `add_sync`: as `add`, but waits for the Backend round trip.
    pub fn add_sync(&self, parent_local: u64, name: &str, attrs: NewEntryAttrs, auth_id: &str) -> Result<Arc<MdHandle>> {
        let handle = self.add(parent_local, name, attrs, auth_id);
        let local_ino = handle.lock().local_ino;
        let err = self.wait_flush(local_ino);
        if err != 0 {
            return Err(MdErrorKind::from_errno(err).into());
        }
        Ok(handle)
    }

    /// §4.5 `remove`: erase `name` from `parent`, mark the child deleted.
    pub fn remove(&self, parent_local: u64, name: &str, auth_id: &str, upstream: bool) -> Result<()> {
        let child_local = match self.peek(parent_local) {
            Some(parent) => parent.lock().local_children.remove(name),
            None => None,
        };
        let child_local = match child_local {
            Some(c) => c,
            None => return Err(MdErrorKind::NotFound.into()),
        };

        if let Some(child) = self.peek(child_local) {
            let mut r = child.lock();
            r.deleted = true;
            r.lookup_count += 1;
            if upstream {
                r.op = MdOp::Rm;
            }
        }

        if let Some(parent) = self.peek(parent_local) {
            parent.lock().op = MdOp::LStore;
        }
        self.flush.push(
            parent_local,
            FlushEntry {
                auth_id: auth_id.to_string(),
                op: MdOp::LStore,
            },
            false,
        );
        if upstream {
            self.flush.push(
                child_local,
                FlushEntry {
                    auth_id: auth_id.to_string(),
                    op: MdOp::Rm,
                },
                false,
            );
        }
        Ok(())
    }

    /// §4.5 `mv`: rename/move, acquiring parent (and child) locks in
    /// ascending local-ino order to avoid the crossed-rename deadlock.
    pub fn mv(
        &self,
        parent1_local: u64,
        parent2_local: u64,
        old_name: &str,
        new_name: &str,
        auth1: &str,
        auth2: &str,
    ) -> Result<()> {
        let parent1 = self.peek(parent1_local).ok_or(MdErrorKind::NotFound)?;
        let child_local = match parent1.lock().local_children.get(old_name).copied() {
            Some(c) => c,
            None => return Err(MdErrorKind::NotFound.into()),
        };

        let mut inos = vec![parent1_local, parent2_local, child_local];
        inos.sort_unstable();
        inos.dedup();

        let handles: Vec<(u64, Arc<MdHandle>)> = inos
            .into_iter()
            .filter_map(|ino| self.peek(ino).map(|h| (ino, h)))
            .collect();
        let mut guards: Vec<(u64, MutexGuard<'_, MdRecord>)> =
            handles.iter().map(|(ino, h)| (*ino, h.lock())).collect();

        let idx = |ino: u64, guards: &[(u64, MutexGuard<'_, MdRecord>)]| {
            guards.iter().position(|(i, _)| *i == ino).unwrap()
        };

        let p1_idx = idx(parent1_local, &guards);
        guards[p1_idx].1.local_children.remove(old_name);
        guards[p1_idx].1.op = MdOp::Update;

        let p2_idx = idx(parent2_local, &guards);
        guards[p2_idx].1.local_children.insert(new_name.to_string(), child_local);
        guards[p2_idx].1.op = MdOp::Update;
        let parent2_remote = guards[p2_idx].1.remote_ino;

        let child_idx = idx(child_local, &guards);
        guards[child_idx].1.name = new_name.to_string();
        guards[child_idx].1.parent_local = parent2_local;
        guards[child_idx].1.parent_remote = parent2_remote;
        guards[child_idx].1.op = MdOp::Update;

        drop(guards);

        self.flush.push(
            child_local,
            FlushEntry {
                auth_id: auth1.to_string(),
                op: MdOp::Update,
            },
            false,
        );
        self.flush.push(
            parent1_local,
            FlushEntry {
                auth_id: auth1.to_string(),
                op: MdOp::Update,
            },
            false,
        );
        if parent2_local != parent1_local {
            self.flush.push(
                parent2_local,
                FlushEntry {
                    auth_id: auth2.to_string(),
                    op: MdOp::Update,
                },
                false,
            );
        }
        Ok(())
    }

    /// §4.5 `forget`: decrement lookup-count; remove once it reaches zero
    /// and the flush queue holds nothing for this inode.
    pub fn forget(&self, local_ino: u64, nlookup: u64) -> Result<()> {
        let handle = match self.peek(local_ino) {
            Some(h) => h,
            None => return Ok(()),
        };
        let reached_zero = {
            let mut r = handle.lock();
            r.lookup_count = r.lookup_count.saturating_sub(nlookup);
            r.lookup_count == 0
        };
        if reached_zero {
            if !self.flush.is_empty_for(local_ino) {
                return Err(MdErrorKind::Busy.into());
            }
            self.table.lock().unwrap().remove(&local_ino);
        }
        Ok(())
    }

    /// §4.5 `wait_flush`: block until the record's pending op clears, then
    /// report whether the upstream create ultimately succeeded.
    pub fn wait_flush(&self, local_ino: u64) -> i32 {
        let handle = match self.peek(local_ino) {
            Some(h) => h,
            None => return 0,
        };
        let err = handle.wait_for_flush();
        if err != 0 {
            return err;
        }
        if self.vmap.forward(local_ino) == 0 {
            return err;
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::backend::MdWire;
    use crate::cap::{CapIdentity, CapStore};
    use crate::kv::NoopKvStore;
    use crate::md::record::Timespec;
    use std::collections::HashMap as Map;
    use std::time::Duration;

    fn identity() -> CapIdentity {
        CapIdentity {
            login: "alice".into(),
            host: "box1".into(),
            mount_name: "data".into(),
        }
    }

    fn cache_with_backend() -> (Arc<MdCache>, Arc<MockBackend>, Arc<FlushQueue>) {
        let kv: Arc<dyn KvStore> = Arc::new(NoopKvStore);
        let vmap = Arc::new(VMap::new(kv.clone()));
        let flush = Arc::new(FlushQueue::new(1000));
        let backend = Arc::new(MockBackend::new());
        let cache = Arc::new(MdCache::new(vmap, kv, flush.clone(), backend.clone()));
        (cache, backend, flush)
    }

    fn sample_mdwire(remote_ino: u64, remote_parent: u64, name: &str) -> MdWire {
        MdWire {
            remote_ino,
            remote_parent,
            name: name.to_string(),
            mode: 0o100_640,
            uid: 1000,
            gid: 1000,
            size: 0,
            atime: Timespec::default(),
            mtime: Timespec::default(),
            ctime: Timespec::default(),
            btime: Timespec::default(),
            nlink: 1,
            target: None,
            xattr: Map::new(),
            flags: 0,
            cap: None,
        }
    }

    #[test]
    fn apply_mints_a_local_ino_and_registers_in_the_parent() {
        let (cache, _backend, _flush) = cache_with_backend();
        let caps = CapStore::new(identity(), Duration::from_secs(300));

        cache.apply(&caps, Frame::Md(sample_mdwire(1, 0, "/"))).unwrap();
        let root = cache.peek(1).unwrap();
        assert_eq!(root.lock().remote_ino, 1);

        cache.apply(&caps, Frame::Md(sample_mdwire(100, 1, "d"))).unwrap();
        let root = cache.peek(1).unwrap();
        let child_local = *root.lock().local_children.get("d").unwrap();
        assert_eq!(cache.peek(child_local).unwrap().lock().remote_ino, 100);
    }

    #[test]
    fn add_enqueues_add_then_lstore_and_wait_flush_unblocks_once_applied() {
        let (cache, _backend, flush) = cache_with_backend();
        let caps = CapStore::new(identity(), Duration::from_secs(300));
        cache.apply(&caps, Frame::Md(sample_mdwire(1, 0, "/"))).unwrap();

        let handle = cache.add(
            1,
            "f",
            NewEntryAttrs {
                mode: 0o100_640,
                uid: 1000,
                gid: 1000,
                target: None,
            },
            "auth-1",
        );
        let local_ino = handle.lock().local_ino;

        let shutdown = std::sync::atomic::AtomicBool::new(false);
        let (parent_ino, parent_batch) = flush.pop_coalesced(&shutdown).unwrap();
        assert_eq!(parent_ino, 1);
        assert_eq!(parent_batch[0].op, MdOp::LStore);
        let (child_ino, child_batch) = flush.pop_coalesced(&shutdown).unwrap();
        assert_eq!(child_ino, local_ino);
        assert_eq!(child_batch[0].op, MdOp::Add);

        // simulate the flush worker applying the create.
        cache.vmap.insert(local_ino, 200).unwrap();
        {
            let mut r = handle.lock();
            r.remote_ino = 200;
            r.op = MdOp::None;
        }
        handle.notify_flush_done();

        assert_eq!(cache.wait_flush(local_ino), 0);
    }

    #[test]
    fn forget_to_zero_removes_the_record_when_queue_is_empty() {
        let (cache, _backend, _flush) = cache_with_backend();
        let caps = CapStore::new(identity(), Duration::from_secs(300));
        cache.apply(&caps, Frame::Md(sample_mdwire(1, 0, "/"))).unwrap();
        cache.apply(&caps, Frame::Md(sample_mdwire(100, 1, "d"))).unwrap();

        let root = cache.peek(1).unwrap();
        let child_local = *root.lock().local_children.get("d").unwrap();
        let handle = cache.peek(child_local).unwrap();
        handle.lock().lookup_count = 1;
        handle.lock().op = MdOp::None;

        cache.forget(child_local, 1).unwrap();
        assert!(cache.peek(child_local).is_none());
    }

    #[test]
    fn mv_enqueues_update_for_the_child_and_both_parents() {
        let (cache, _backend, flush) = cache_with_backend();
        let caps = CapStore::new(identity(), Duration::from_secs(300));
        cache.apply(&caps, Frame::Md(sample_mdwire(1, 0, "/"))).unwrap();
        cache.apply(&caps, Frame::Md(sample_mdwire(100, 1, "a"))).unwrap();
        cache.apply(&caps, Frame::Md(sample_mdwire(101, 1, "b"))).unwrap();
        cache.apply(&caps, Frame::Md(sample_mdwire(200, 100, "x"))).unwrap();

        let root = cache.peek(1).unwrap();
        let parent_a = *root.lock().local_children.get("a").unwrap();
        let parent_b = *root.lock().local_children.get("b").unwrap();
        let parent_a_handle = cache.peek(parent_a).unwrap();
        let child_local = *parent_a_handle.lock().local_children.get("x").unwrap();

        // drain whatever `apply`/`add` already queued so only `mv`'s pushes
        // remain to inspect. `shutdown = true` makes `pop_coalesced` return
        // `None` as soon as the queue empties instead of blocking on the
        // next push.
        let shutdown = std::sync::atomic::AtomicBool::new(true);
        while flush.pop_coalesced(&shutdown).is_some() {}

        cache.mv(parent_a, parent_b, "x", "y", "auth-1", "auth-2").unwrap();

        let mut seen = Map::new();
        while let Some((ino, batch)) = flush.pop_coalesced(&shutdown) {
            seen.insert(ino, batch[0].op);
        }
        assert_eq!(seen.get(&child_local), Some(&MdOp::Update));
        assert_eq!(seen.get(&parent_a), Some(&MdOp::Update));
        assert_eq!(seen.get(&parent_b), Some(&MdOp::Update));
    }
}
