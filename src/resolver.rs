//! The Resolver (§2, §4): the surface the FUSE entry points call through.
//! Every method here follows the dataflow §2 lays out — consult the
//! MDCache, acquire a CapStore entry (which may itself call the Backend
//! synchronously on a cap miss or expiry), mutate the MDCache, enqueue
//! FlushQueue work, and invalidate the kernel's view when the mutation
//! warrants it.

use crate::backend::Backend;
use crate::cap::{Cap, CapStore, QuotaStore, R_OK, W_OK, X_OK};
use crate::config::CoreConfig;
use crate::error::MdErrorKind;
use crate::flush::{FlushEntry, FlushQueue};
use crate::kernel::KernelNotify;
use crate::md::{MdCache, MdHandle, MdOp, NewEntryAttrs, Timespec};
use crate::req::RequestCtx;
use crate::vmap::VMap;
use crate::Result;
use std::sync::{Arc, Mutex};

const S_IFMT: u32 = 0o170_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFLNK: u32 = 0o120_000;
const S_IFREG: u32 = 0o100_000;

/// attribute fields a `setattr` call may update; `None` leaves the field
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct SetAttr {
    /// permission bits only; the type bits in `mode` are never touched.
    pub mode: Option<u32>,
    /// new owning uid.
    pub uid: Option<u32>,
    /// new owning gid.
    pub gid: Option<u32>,
    /// truncation/extension target size.
    pub size: Option<u64>,
    /// new access time.
    pub atime: Option<Timespec>,
    /// new modification time.
    pub mtime: Option<Timespec>,
}

/// the Resolver: collaborators plus the config knobs that change where it
/// synchronizes (`rename_is_sync`, `rmdir_is_sync`, `md_kernelcache`).
pub struct Resolver {
    md: Arc<MdCache>,
    caps: Arc<CapStore>,
    quotas: Arc<QuotaStore>,
    vmap: Arc<VMap>,
    flush: Arc<FlushQueue>,
    backend: Arc<dyn Backend>,
    kernel: Arc<dyn KernelNotify>,
    config: CoreConfig,
}

impl Resolver {
    /// a Resolver over the given collaborators, sharing ownership with
    /// whatever else the mount instance (`CoreHandle`) wires them into.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        md: Arc<MdCache>,
        caps: Arc<CapStore>,
        quotas: Arc<QuotaStore>,
        vmap: Arc<VMap>,
        flush: Arc<FlushQueue>,
        backend: Arc<dyn Backend>,
        kernel: Arc<dyn KernelNotify>,
        config: CoreConfig,
    ) -> Self {
        Resolver {
            md,
            caps,
            quotas,
            vmap,
            flush,
            backend,
            kernel,
            config,
        }
    }

    fn require_cap(&self, req: &RequestCtx, ino: u64, mode: u32) -> Result<Arc<Mutex<Cap>>> {
        let cap = self
            .caps
            .acquire(req, ino, mode, &self.vmap, self.backend.as_ref(), &self.md)?;
        let errc = cap.lock().unwrap().errc;
        if errc != 0 {
            return Err(MdErrorKind::from_errno(errc).into());
        }
        Ok(cap)
    }

    fn notify_entry_removed(&self, parent_local: u64, name: &str, child_local: u64) {
        if !self.config.md_kernelcache {
            return;
        }
        self.kernel.invalidate_entry(parent_local, name);
        self.kernel.invalidate_inode(child_local, !self.md.is_dir(child_local));
    }

    /// §4.5 `lookup`.
    pub fn lookup(&self, _req: &RequestCtx, parent_local: u64, name: &str) -> Result<Arc<MdHandle>> {
        self.md.lookup(&self.caps, parent_local, name)
    }

    /// plain attribute fetch; does not require a cap, matching `getattr`'s
    /// usual FUSE semantics of working off whatever is cached.
    pub fn getattr(&self, _req: &RequestCtx, ino: u64) -> Result<Arc<MdHandle>> {
        self.md.get(&self.caps, ino, false)
    }

    /// a current children listing, requiring `R_OK|X_OK` on the directory.
    pub fn readdir(&self, req: &RequestCtx, ino: u64) -> Result<Arc<MdHandle>> {
        self.require_cap(req, ino, R_OK | X_OK)?;
        self.md.get(&self.caps, ino, true)
    }

    fn check_absent(&self, parent_local: u64, name: &str) -> Result<()> {
        match self.md.lookup(&self.caps, parent_local, name) {
            Ok(_) => Err(MdErrorKind::Exists.into()),
            Err(e) if e.kind() == MdErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn implied_auth(cap: &Arc<Mutex<Cap>>, child_local: u64) -> String {
        let auth_id = cap.lock().unwrap().auth_id.clone();
        format!("{}:implied:{:x}", auth_id, child_local)
    }

    /// §4.5 `create`: mint a regular file under `parent_local`, confirmed
    /// synchronously so the caller gets a real errno on failure, then
    /// imply an immediate cap on the child so the first write does not
    /// need its own round trip.
    pub fn create(&self, req: &RequestCtx, parent_local: u64, name: &str, mode: u32) -> Result<Arc<MdHandle>> {
        self.check_absent(parent_local, name)?;
        let parent_cap = self.require_cap(req, parent_local, W_OK)?;
        let auth_id = parent_cap.lock().unwrap().auth_id.clone();

        let attrs = NewEntryAttrs {
            mode: (mode & !S_IFMT) | S_IFREG,
            uid: req.uid,
            gid: req.gid,
            target: None,
        };
        let handle = self.md.add_sync(parent_local, name, attrs, &auth_id)?;
        let child_local = handle.lock().local_ino;
        let implied_auth = Self::implied_auth(&parent_cap, child_local);
        self.caps.imply(&parent_cap, &implied_auth, R_OK | W_OK, child_local, &self.md);
        Ok(handle)
    }

    /// §4.5 `mkdir`: as `create`, minting a directory.
    pub fn mkdir(&self, req: &RequestCtx, parent_local: u64, name: &str, mode: u32) -> Result<Arc<MdHandle>> {
        self.check_absent(parent_local, name)?;
        let parent_cap = self.require_cap(req, parent_local, W_OK)?;
        let auth_id = parent_cap.lock().unwrap().auth_id.clone();

        let attrs = NewEntryAttrs {
            mode: (mode & !S_IFMT) | S_IFDIR,
            uid: req.uid,
            gid: req.gid,
            target: None,
        };
        let handle = self.md.add_sync(parent_local, name, attrs, &auth_id)?;
        handle.lock().nlink = 2;
        let child_local = handle.lock().local_ino;
        let implied_auth = Self::implied_auth(&parent_cap, child_local);
        self.caps
            .imply(&parent_cap, &implied_auth, R_OK | W_OK | X_OK, child_local, &self.md);
        Ok(handle)
    }

    /// §4.5 `symlink`: as `create`, minting a symlink whose `target` field
    /// carries the link text.
    pub fn symlink(&self, req: &RequestCtx, parent_local: u64, name: &str, target: &str) -> Result<Arc<MdHandle>> {
        self.check_absent(parent_local, name)?;
        let parent_cap = self.require_cap(req, parent_local, W_OK)?;
        let auth_id = parent_cap.lock().unwrap().auth_id.clone();

        let attrs = NewEntryAttrs {
            mode: S_IFLNK | 0o777,
            uid: req.uid,
            gid: req.gid,
            target: Some(target.to_string()),
        };
        let handle = self.md.add_sync(parent_local, name, attrs, &auth_id)?;
        let child_local = handle.lock().local_ino;
        let implied_auth = Self::implied_auth(&parent_cap, child_local);
        self.caps.imply(&parent_cap, &implied_auth, R_OK, child_local, &self.md);
        Ok(handle)
    }

    /// `link`: add `new_name` under `new_parent_local` naming the already
    /// existing `existing_local`. The MD record's single `parent_local`
    /// field (§3) means a linked inode's recorded parent becomes whichever
    /// directory entry was created last; full multi-parent bookkeeping is
    /// not modeled (see DESIGN.md). Hard-links across distinct quota nodes
    /// remain out of scope (§1 Non-goals) and are rejected with `EPERM`.
    pub fn link(&self, req: &RequestCtx, existing_local: u64, new_parent_local: u64, new_name: &str) -> Result<Arc<MdHandle>> {
        self.check_absent(new_parent_local, new_name)?;
        let existing = self.md.get(&self.caps, existing_local, false)?;
        let parent_cap = self.require_cap(req, new_parent_local, W_OK)?;
        let existing_cap = self.caps.get(req, existing_local);

        let same_quota_node = {
            let a = parent_cap.lock().unwrap();
            let b = existing_cap.lock().unwrap();
            a.quota_node == 0 || b.quota_node == 0 || a.quota_node == b.quota_node
        };
        if !same_quota_node {
            return Err(MdErrorKind::Permission.into());
        }

        let auth_id = parent_cap.lock().unwrap().auth_id.clone();
        {
            let mut r = existing.lock();
            r.nlink += 1;
            r.op = MdOp::Update;
        }
        if let Some(parent) = self.md.peek(new_parent_local) {
            let mut p = parent.lock();
            p.local_children.insert(new_name.to_string(), existing_local);
            p.op = MdOp::LStore;
        }
        self.flush.push(
            existing_local,
            FlushEntry {
                auth_id: auth_id.clone(),
                op: MdOp::Update,
            },
            false,
        );
        self.flush.push(
            new_parent_local,
            FlushEntry {
                auth_id,
                op: MdOp::LStore,
            },
            false,
        );
        Ok(existing)
    }

    /// §4.5 `remove` for a non-directory entry.
    pub fn unlink(&self, req: &RequestCtx, parent_local: u64, name: &str) -> Result<()> {
        let parent_cap = self.require_cap(req, parent_local, W_OK)?;
        let child = self.md.lookup(&self.caps, parent_local, name)?;
        let child_local = child.lock().local_ino;
        let auth_id = parent_cap.lock().unwrap().auth_id.clone();
        self.md.remove(parent_local, name, &auth_id, true)?;
        self.notify_entry_removed(parent_local, name, child_local);
        Ok(())
    }

    /// §4.5 `remove` for a directory entry, refusing non-empty directories
    /// (`ENOTEMPTY`) after forcing a fresh listing to answer authoritatively.
    pub fn rmdir(&self, req: &RequestCtx, parent_local: u64, name: &str) -> Result<()> {
        let parent_cap = self.require_cap(req, parent_local, W_OK)?;
        let child = self.md.lookup(&self.caps, parent_local, name)?;
        let child_local = child.lock().local_ino;

        let listing = self.md.get(&self.caps, child_local, true)?;
        let empty = listing.lock().local_children.is_empty();
        if !empty {
            return Err(MdErrorKind::NotEmpty.into());
        }

        let auth_id = parent_cap.lock().unwrap().auth_id.clone();
        self.md.remove(parent_local, name, &auth_id, true)?;
        if self.config.rmdir_is_sync {
            let err = self.md.wait_flush(child_local);
            if err != 0 {
                return Err(MdErrorKind::from_errno(err).into());
            }
        }
        self.notify_entry_removed(parent_local, name, child_local);
        Ok(())
    }

    /// §4.5 `mv`: rename/move `name1` under `parent1` to `name2` under
    /// `parent2`, overwriting an existing `name2` the way POSIX `rename(2)`
    /// does.
    pub fn rename(&self, req: &RequestCtx, parent1: u64, name1: &str, parent2: u64, name2: &str) -> Result<()> {
        let cap1 = self.require_cap(req, parent1, W_OK)?;
        let cap2 = if parent2 == parent1 {
            cap1.clone()
        } else {
            self.require_cap(req, parent2, W_OK)?
        };

        if let Ok(existing) = self.md.lookup(&self.caps, parent2, name2) {
            let existing_local = existing.lock().local_ino;
            let auth2 = cap2.lock().unwrap().auth_id.clone();
            self.md.remove(parent2, name2, &auth2, true)?;
            self.notify_entry_removed(parent2, name2, existing_local);
        }

        let auth1 = cap1.lock().unwrap().auth_id.clone();
        let auth2 = cap2.lock().unwrap().auth_id.clone();
        self.md.mv(parent1, parent2, name1, name2, &auth1, &auth2)?;

        if self.config.rename_is_sync {
            if let Ok(moved) = self.md.lookup(&self.caps, parent2, name2) {
                let ino = moved.lock().local_ino;
                let err = self.md.wait_flush(ino);
                if err != 0 {
                    return Err(MdErrorKind::from_errno(err).into());
                }
            }
        }

        if self.config.md_kernelcache {
            self.kernel.invalidate_entry(parent1, name1);
            self.kernel.invalidate_entry(parent2, name2);
        }
        Ok(())
    }

    /// §4.5 `forget`.
    pub fn forget(&self, ino: u64, nlookup: u64) -> Result<()> {
        self.md.forget(ino, nlookup)
    }

    /// mutate the attributes named in `attr`; any `size` change books or
    /// frees the delta against the inode's quota node.
    pub fn setattr(&self, req: &RequestCtx, ino: u64, attr: SetAttr) -> Result<Arc<MdHandle>> {
        let cap = self.require_cap(req, ino, W_OK)?;
        let handle = self.md.get(&self.caps, ino, false)?;

        let mut size_delta: i64 = 0;
        {
            let mut r = handle.lock();
            if let Some(mode) = attr.mode {
                r.mode = (r.mode & S_IFMT) | (mode & !S_IFMT);
            }
            if let Some(uid) = attr.uid {
                r.uid = uid;
            }
            if let Some(gid) = attr.gid {
                r.gid = gid;
            }
            if let Some(size) = attr.size {
                size_delta = size as i64 - r.size as i64;
                r.size = size;
            }
            if let Some(atime) = attr.atime {
                r.atime = atime;
            }
            if let Some(mtime) = attr.mtime {
                r.mtime = mtime;
            }
            r.ctime = Timespec::now();
            r.op = MdOp::Update;
        }

        if size_delta > 0 {
            self.quotas.get(&cap.lock().unwrap()).lock().unwrap().book_volume(size_delta as u64);
        } else if size_delta < 0 {
            self.quotas.get(&cap.lock().unwrap()).lock().unwrap().free_volume((-size_delta) as u64);
        }

        let auth_id = cap.lock().unwrap().auth_id.clone();
        self.flush.push(ino, FlushEntry { auth_id, op: MdOp::Update }, false);
        Ok(handle)
    }

    /// reserve `additional_bytes` against the inode's quota node ahead of a
    /// data write; the data write itself is the excluded chunk-I/O
    /// collaborator's job (§1). Fails fast with `EDQUOT` and no RPC once a
    /// prior call has already tripped `volume_edquota` on this quota node.
    pub fn begin_write(&self, req: &RequestCtx, ino: u64, additional_bytes: u64) -> Result<()> {
        let cap = self.require_cap(req, ino, W_OK)?;
        let quota = self.quotas.get(&cap.lock().unwrap());
        let mut q = quota.lock().unwrap();
        if !q.has_quota(additional_bytes) {
            q.set_volume_edquota();
            return Err(MdErrorKind::Quota.into());
        }
        q.book_volume(additional_bytes);
        Ok(())
    }

    /// release a reservation made by `begin_write` that the data write
    /// ultimately did not consume (short write, aborted write).
    pub fn abort_write(&self, req: &RequestCtx, ino: u64, unused_bytes: u64) {
        let cap = self.caps.get(req, ino);
        self.quotas.get(&cap.lock().unwrap()).lock().unwrap().free_volume(unused_bytes);
    }

    /// record a completed write: bump `size`/`mtime` and enqueue the
    /// upstream update.
    pub fn commit_write(&self, req: &RequestCtx, ino: u64, new_size: u64) -> Result<()> {
        let cap = self.require_cap(req, ino, W_OK)?;
        let handle = self.md.get(&self.caps, ino, false)?;
        {
            let mut r = handle.lock();
            r.size = r.size.max(new_size);
            r.mtime = Timespec::now();
            r.ctime = r.mtime;
            r.op = MdOp::Update;
        }
        let auth_id = cap.lock().unwrap().auth_id.clone();
        self.flush.push(ino, FlushEntry { auth_id, op: MdOp::Update }, false);
        Ok(())
    }

    /// extended-attribute read.
    pub fn getxattr(&self, req: &RequestCtx, ino: u64, name: &str) -> Result<Vec<u8>> {
        self.require_cap(req, ino, R_OK)?;
        let handle = self.md.get(&self.caps, ino, false)?;
        handle
            .lock()
            .xattr
            .get(name)
            .cloned()
            .ok_or_else(|| MdErrorKind::NotFound.into())
    }

    /// extended-attribute write.
    pub fn setxattr(&self, req: &RequestCtx, ino: u64, name: &str, value: Vec<u8>) -> Result<()> {
        let cap = self.require_cap(req, ino, W_OK)?;
        let handle = self.md.get(&self.caps, ino, false)?;
        {
            let mut r = handle.lock();
            r.xattr.insert(name.to_string(), value);
            r.op = MdOp::Update;
        }
        let auth_id = cap.lock().unwrap().auth_id.clone();
        self.flush.push(ino, FlushEntry { auth_id, op: MdOp::Update }, false);
        Ok(())
    }

    /// extended-attribute removal.
    pub fn removexattr(&self, req: &RequestCtx, ino: u64, name: &str) -> Result<()> {
        let cap = self.require_cap(req, ino, W_OK)?;
        let handle = self.md.get(&self.caps, ino, false)?;
        let existed = {
            let mut r = handle.lock();
            let existed = r.xattr.remove(name).is_some();
            if existed {
                r.op = MdOp::Update;
            }
            existed
        };
        if !existed {
            return Err(MdErrorKind::NotFound.into());
        }
        let auth_id = cap.lock().unwrap().auth_id.clone();
        self.flush.push(ino, FlushEntry { auth_id, op: MdOp::Update }, false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::backend::{CapWire, Frame, MdWire, QuotaWire};
    use crate::cap::CapIdentity;
    use crate::kernel::NoopKernelNotify;
    use crate::kv::NoopKvStore;
    use crate::md::record::Timespec as Ts;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::JoinHandle;

    fn identity() -> CapIdentity {
        CapIdentity {
            login: "alice".into(),
            host: "box1".into(),
            mount_name: "data".into(),
        }
    }

    /// the root's `MdWire`, using the `remote_ino == 0` sentinel `MdCache`
    /// resolves to the fixed root local-ino without minting a fresh one
    /// (mirrors what a real `GetMdRoot` response carries). The embedded cap
    /// matches the `uid`/`gid` every test's `RequestCtx` uses, so `acquire`
    /// finds it pre-stored and valid without a round trip.
    fn root_md() -> MdWire {
        MdWire {
            remote_ino: 0,
            remote_parent: 0,
            name: "/".into(),
            mode: 0o040_755,
            uid: 0,
            gid: 0,
            size: 0,
            atime: Ts::default(),
            mtime: Ts::default(),
            ctime: Ts::default(),
            btime: Ts::default(),
            nlink: 2,
            target: None,
            xattr: HashMap::new(),
            flags: 0,
            cap: Some(CapWire {
                id: 0,
                mode: R_OK | W_OK | X_OK,
                vtime: Ts { sec: i64::MAX / 2, nsec: 0 },
                uid: 1000,
                gid: 1000,
                client_id: "client-a".into(),
                auth_id: "auth-root".into(),
                client_uuid: "uuid-1".into(),
                quota_node: 1,
                max_file_size: 0,
                error_code: 0,
                quota: QuotaWire {
                    quota_node: 1,
                    max_volume: 1024 * 1024,
                    max_inodes: 0,
                },
            }),
        }
    }

    /// a `Resolver` over a root already cached (with a valid cap), plus its
    /// `MockBackend` and a live flush-worker thread draining the queue so
    /// `add_sync`'s `wait_flush` unblocks the way it would against a real
    /// worker. Tests must `shutdown`+`join` the worker before returning.
    fn resolver_with_cached_root() -> (Resolver, Arc<MockBackend>, Arc<AtomicBool>, JoinHandle<()>) {
        let kv: Arc<dyn crate::kv::KvStore> = Arc::new(NoopKvStore);
        let vmap = Arc::new(VMap::new(kv.clone()));
        let flush = Arc::new(FlushQueue::new(1000));
        let backend = Arc::new(MockBackend::new());
        let md = Arc::new(MdCache::new(vmap.clone(), kv.clone(), flush.clone(), backend.clone()));
        let caps = Arc::new(CapStore::new(identity(), std::time::Duration::from_secs(300)));
        let quotas = Arc::new(QuotaStore::new());

        md.apply(&caps, Frame::Md(root_md())).unwrap();

        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_md = md.clone();
        let worker_flush = flush.clone();
        let worker_kv = kv;
        let worker_vmap = vmap.clone();
        let worker_backend: Arc<dyn Backend> = backend.clone();
        let worker_shutdown = shutdown.clone();
        let worker = std::thread::spawn(move || {
            crate::flush::worker::run(&worker_md, &worker_flush, &worker_kv, &worker_vmap, &worker_backend, &worker_shutdown);
        });

        let resolver = Resolver::new(
            md,
            caps,
            quotas,
            vmap,
            flush,
            backend.clone(),
            Arc::new(NoopKernelNotify),
            CoreConfig::default(),
        );
        (resolver, backend, shutdown, worker)
    }

    fn stop(shutdown: Arc<AtomicBool>, worker: JoinHandle<()>) {
        shutdown.store(true, Ordering::SeqCst);
        worker.join().unwrap();
    }

    fn sample_child(name: &str) -> MdWire {
        MdWire {
            remote_ino: 100,
            remote_parent: 0,
            name: name.to_string(),
            mode: 0o100_640,
            uid: 1000,
            gid: 1000,
            size: 0,
            atime: Ts::default(),
            mtime: Ts::default(),
            ctime: Ts::default(),
            btime: Ts::default(),
            nlink: 1,
            target: None,
            xattr: HashMap::new(),
            flags: 0,
            cap: None,
        }
    }

    #[test]
    fn create_then_lookup_returns_the_same_local_ino() {
        let (resolver, backend, shutdown, worker) = resolver_with_cached_root();
        let req = RequestCtx::new(1000, 1000, 1, "client-a");

        backend.push_response(Ok(Frame::Md(sample_child("f"))));

        let created = resolver.create(&req, 1, "f", 0o640).unwrap();
        let created_ino = created.lock().local_ino;
        assert!(created_ino >= 2);

        let looked_up = resolver.lookup(&req, 1, "f").unwrap();
        assert_eq!(looked_up.lock().local_ino, created_ino);

        stop(shutdown, worker);
    }

    #[test]
    fn create_on_an_existing_name_fails_with_eexist() {
        let (resolver, backend, shutdown, worker) = resolver_with_cached_root();
        let req = RequestCtx::new(1000, 1000, 1, "client-a");

        backend.push_response(Ok(Frame::Md(sample_child("f"))));
        resolver.create(&req, 1, "f", 0o640).unwrap();

        let err = resolver.create(&req, 1, "f", 0o640).unwrap_err();
        assert_eq!(err.kind(), MdErrorKind::Exists);

        stop(shutdown, worker);
    }

    #[test]
    fn quota_exhaustion_is_rejected_without_a_round_trip() {
        let (resolver, backend, shutdown, worker) = resolver_with_cached_root();
        let req = RequestCtx::new(1000, 1000, 1, "client-a");

        // the root's embedded cap (see `root_md`) already carries a 1 MiB
        // volume quota, refreshed into the QuotaStore on first use.
        resolver.begin_write(&req, 1, 512 * 1024).unwrap();

        let err = resolver.begin_write(&req, 1, 600 * 1024).unwrap_err();
        assert_eq!(err.kind(), MdErrorKind::Quota);

        let err2 = resolver.begin_write(&req, 1, 1).unwrap_err();
        assert_eq!(err2.kind(), MdErrorKind::Quota);

        assert!(backend.requests.lock().unwrap().is_empty());
        stop(shutdown, worker);
    }

    #[test]
    fn lookup_of_an_absent_child_never_calls_the_backend_again() {
        let (resolver, backend, shutdown, worker) = resolver_with_cached_root();
        let req = RequestCtx::new(1000, 1000, 1, "client-a");

        backend.push_response(Ok(Frame::MdMap(crate::backend::MdMapWire {
            reference_ino: 0,
            children: HashMap::new(),
        })));
        let _ = resolver.getattr(&req, 1).unwrap();
        let _ = resolver.readdir(&req, 1).unwrap();
        let after_readdir = backend.requests.lock().unwrap().len();

        let err = resolver.lookup(&req, 1, "missing").unwrap_err();
        assert_eq!(err.kind(), MdErrorKind::NotFound);
        assert_eq!(backend.requests.lock().unwrap().len(), after_readdir);

        stop(shutdown, worker);
    }

    #[test]
    fn rmdir_on_a_nonempty_directory_fails_with_enotempty() {
        let (resolver, backend, shutdown, worker) = resolver_with_cached_root();
        let req = RequestCtx::new(1000, 1000, 1, "client-a");

        backend.push_response(Ok(Frame::Md(MdWire {
            mode: 0o040_750,
            ..sample_child("sub")
        })));
        resolver.mkdir(&req, 1, "sub", 0o750).unwrap();
        let sub_ino = resolver.lookup(&req, 1, "sub").unwrap().lock().local_ino;

        backend.push_response(Ok(Frame::Md(MdWire {
            remote_ino: 101,
            remote_parent: 100,
            ..sample_child("leaf")
        })));
        resolver.create(&req, sub_ino, "leaf", 0o640).unwrap();

        // `rmdir` forces a fresh listing of `sub` before trusting it empty.
        let mut children = HashMap::new();
        children.insert(
            "leaf".to_string(),
            MdWire {
                remote_ino: 101,
                remote_parent: 100,
                ..sample_child("leaf")
            },
        );
        backend.push_response(Ok(Frame::MdMap(crate::backend::MdMapWire {
            reference_ino: 100,
            children,
        })));

        let err = resolver.rmdir(&req, 1, "sub").unwrap_err();
        assert_eq!(err.kind(), MdErrorKind::NotEmpty);

        stop(shutdown, worker);
    }
}
