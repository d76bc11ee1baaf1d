//! The flush queue's single consumer (§4.6, §9 "coroutine-free flush"):
//! pops one inode's coalesced FIFO at a time and applies it to the Backend
//! and the KVStore, signalling `wait_flush` callers once each entry clears.

use super::{FlushEntry, FlushQueue};
use crate::backend::{Backend, Frame, PutOp, Request};
use crate::error::MdErrorKind;
use crate::kv::{Key, KvStore};
use crate::md::{MdCache, MdOp, MdType, MD_TAG};
use crate::vmap::VMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{error, trace};

/// drive `flush` until it reports shutdown-and-drained. The worker never
/// holds an MD record's lock across a Backend call; it copies out the wire
/// form first, releases the lock, then re-acquires it to record the
/// outcome (§5 suspension-point rule for Backend RPC).
pub fn run(
    md: &Arc<MdCache>,
    flush: &Arc<FlushQueue>,
    kv: &Arc<dyn KvStore>,
    vmap: &Arc<VMap>,
    backend: &Arc<dyn Backend>,
    shutdown: &AtomicBool,
) {
    while let Some((local_ino, batch)) = flush.pop_coalesced(shutdown) {
        for entry in &batch {
            apply_one(md, kv.as_ref(), vmap.as_ref(), backend.as_ref(), local_ino, entry);
        }
        flush.mark_done(local_ino);
    }
}

fn apply_one(md: &MdCache, kv: &dyn KvStore, vmap: &VMap, backend: &dyn Backend, local_ino: u64, entry: &FlushEntry) {
    let handle = match md.peek(local_ino) {
        Some(h) => h,
        None => return,
    };

    match entry.op {
        MdOp::Add | MdOp::Update => {
            let wire = handle.lock().to_wire();
            let response = backend.call(Request::PutMd {
                md: wire,
                auth_id: entry.auth_id.clone(),
                op: PutOp::Set,
            });

            let mut r = handle.lock();
            match response {
                Ok(Frame::Md(mw)) => match vmap.insert(local_ino, mw.remote_ino) {
                    Ok(()) => {
                        r.remote_ino = mw.remote_ino;
                        r.creator = false;
                        if r.ty == MdType::Excl {
                            r.ty = MdType::Md;
                        }
                        r.err = 0;
                    }
                    Err(e) => {
                        error!(local_ino, %e, critical = true, "vmap insert failed applying putMD");
                        r.err = MdErrorKind::Transport.errno();
                    }
                },
                Ok(Frame::Errno(0)) => {
                    r.creator = false;
                    if r.ty == MdType::Excl {
                        r.ty = MdType::Md;
                    }
                    r.err = 0;
                }
                Ok(Frame::Errno(e)) => {
                    vmap.erase_fwd(local_ino);
                    r.err = e;
                }
                Ok(_) => {
                    error!(local_ino, critical = true, "putMD answered with an unexpected container");
                    vmap.erase_fwd(local_ino);
                    r.err = MdErrorKind::Protocol.errno();
                }
                Err(e) => {
                    vmap.erase_fwd(local_ino);
                    r.err = e.errno();
                }
            }
            r.op = MdOp::None;
            drop(r);
            handle.notify_flush_done();
        }

        MdOp::Rm => {
            let wire = handle.lock().to_wire();
            let response = backend.call(Request::PutMd {
                md: wire,
                auth_id: entry.auth_id.clone(),
                op: PutOp::Delete,
            });
            let errno = match &response {
                Ok(Frame::Errno(0)) | Ok(Frame::Md(_)) => 0,
                Ok(Frame::Errno(e)) => *e,
                Ok(_) => MdErrorKind::Protocol.errno(),
                Err(e) => e.errno(),
            };
            if errno != 0 {
                error!(local_ino, errno, "putMD(DELETE) failed");
            }
            let _ = kv.erase(&Key::Tagged(MD_TAG, local_ino));

            let reached_zero = {
                let mut r = handle.lock();
                r.op = MdOp::None;
                r.err = errno;
                r.lookup_count == 0
            };
            handle.notify_flush_done();
            if reached_zero {
                md.purge(local_ino);
            }
        }

        MdOp::LStore => {
            let bytes = serde_json::to_vec(&*handle.lock());
            match bytes {
                Ok(bytes) => {
                    if let Err(e) = kv.put(&Key::Tagged(MD_TAG, local_ino), &bytes) {
                        error!(local_ino, %e, critical = true, "LSTORE put failed");
                    }
                }
                Err(e) => error!(local_ino, %e, "LSTORE serialize failed"),
            }
            handle.lock().op = MdOp::None;
            handle.notify_flush_done();
        }

        MdOp::None => {}
    }
    trace!(local_ino, ?entry.op, "flush entry applied");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::kv::NoopKvStore;
    use crate::md::record::Timespec;

    fn fixtures() -> (Arc<MdCache>, Arc<FlushQueue>, Arc<dyn KvStore>, Arc<VMap>, Arc<MockBackend>) {
        let kv: Arc<dyn KvStore> = Arc::new(NoopKvStore);
        let vmap = Arc::new(VMap::new(kv.clone()));
        let flush = Arc::new(FlushQueue::new(1000));
        let backend = Arc::new(MockBackend::new());
        let md = Arc::new(MdCache::new(vmap.clone(), kv.clone(), flush.clone(), backend.clone()));
        (md, flush, kv, vmap, backend)
    }

    #[test]
    fn add_applies_and_installs_the_vmap_entry() {
        let (md, flush, kv, vmap, backend) = fixtures();
        let caps = crate::cap::CapStore::new(
            crate::cap::CapIdentity {
                login: "alice".into(),
                host: "box1".into(),
                mount_name: "data".into(),
            },
            std::time::Duration::from_secs(300),
        );
        md.apply(
            &caps,
            Frame::Md(crate::backend::MdWire {
                remote_ino: 1,
                remote_parent: 0,
                name: "/".into(),
                mode: 0o040_755,
                uid: 0,
                gid: 0,
                size: 0,
                atime: Timespec::default(),
                mtime: Timespec::default(),
                ctime: Timespec::default(),
                btime: Timespec::default(),
                nlink: 2,
                target: None,
                xattr: Default::default(),
                flags: 0,
                cap: None,
            }),
        )
        .unwrap();

        let handle = md.add(
            1,
            "f",
            crate::md::NewEntryAttrs {
                mode: 0o100_640,
                uid: 1000,
                gid: 1000,
                target: None,
            },
            "auth-1",
        );
        let local_ino = handle.lock().local_ino;

        backend.push_response(Ok(Frame::Md(crate::backend::MdWire {
            remote_ino: 200,
            remote_parent: 1,
            name: "f".into(),
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
            xattr: Default::default(),
            flags: 0,
            cap: None,
        })));
        backend.push_response(Ok(Frame::Errno(0))); // spare; LSTORE never calls the backend

        let shutdown = AtomicBool::new(false);
        // first pop is the parent's LSTORE.
        let (ino, entries) = flush.pop_coalesced(&shutdown).unwrap();
        assert_eq!(ino, 1);
        apply_one(&md, kv.as_ref(), vmap.as_ref(), backend.as_ref(), ino, &entries[0]);

        // second pop is the child's ADD.
        let (ino, entries) = flush.pop_coalesced(&shutdown).unwrap();
        assert_eq!(ino, local_ino);
        apply_one(&md, kv.as_ref(), vmap.as_ref(), backend.as_ref(), ino, &entries[0]);

        assert_eq!(vmap.forward(local_ino), 200);
        assert_eq!(handle.lock().op, MdOp::None);
    }

    #[test]
    fn failed_add_purges_the_vmap_forward_entry_and_records_the_error() {
        let (md, flush, kv, vmap, backend) = fixtures();
        let caps = crate::cap::CapStore::new(
            crate::cap::CapIdentity {
                login: "alice".into(),
                host: "box1".into(),
                mount_name: "data".into(),
            },
            std::time::Duration::from_secs(300),
        );
        md.apply(
            &caps,
            Frame::Md(crate::backend::MdWire {
                remote_ino: 1,
                remote_parent: 0,
                name: "/".into(),
                mode: 0o040_755,
                uid: 0,
                gid: 0,
                size: 0,
                atime: Timespec::default(),
                mtime: Timespec::default(),
                ctime: Timespec::default(),
                btime: Timespec::default(),
                nlink: 2,
                target: None,
                xattr: Default::default(),
                flags: 0,
                cap: None,
            }),
        )
        .unwrap();

        let handle = md.add(
            1,
            "f",
            crate::md::NewEntryAttrs {
                mode: 0o100_640,
                uid: 1000,
                gid: 1000,
                target: None,
            },
            "auth-1",
        );
        let local_ino = handle.lock().local_ino;
        vmap.insert(local_ino, 999).unwrap(); // simulate a stale speculative entry

        backend.push_response(Ok(Frame::Errno(17))); // parent LSTORE response, unused by LStore path
        backend.push_response(Ok(Frame::Errno(17))); // EEXIST on create

        let shutdown = AtomicBool::new(false);
        let (ino, entries) = flush.pop_coalesced(&shutdown).unwrap(); // parent LSTORE
        apply_one(&md, kv.as_ref(), vmap.as_ref(), backend.as_ref(), ino, &entries[0]);
        let (ino, entries) = flush.pop_coalesced(&shutdown).unwrap(); // child ADD
        apply_one(&md, kv.as_ref(), vmap.as_ref(), backend.as_ref(), ino, &entries[0]);

        assert_eq!(vmap.forward(local_ino), 0);
        assert_eq!(handle.lock().err, 17);
    }
}
