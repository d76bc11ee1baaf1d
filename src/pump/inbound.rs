//! Inbound demultiplex thread (§4.8): a non-blocking poll with a ≤200ms tick
//! that dispatches each received frame to the MD cache, the cap store, or
//! the eviction/unmount signal.

use super::transport::PumpInbound;
use crate::backend::Frame;
use crate::cap::CapStore;
use crate::config::CoreConfig;
use crate::flush::FlushQueue;
use crate::kernel::KernelNotify;
use crate::md::MdCache;
use crate::vmap::VMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

const POLL_TICK: Duration = Duration::from_millis(200);
const DRAIN_POLL: Duration = Duration::from_millis(25);
/// upper bound on the LEASE wait-for-drain spin (§4.8); the wait is bounded
/// rather than unconditional so an in-flight `putMD` that never returns
/// cannot wedge this thread forever (§5 only allows bounded blocking).
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// drive `transport` until `shutdown` is set. `evicted` is a separate flag
/// from `shutdown`: an `EVICT` frame sets it so the caller (the excluded
/// CLI front-end, via `CoreHandle`) can signal the mount to unmount and
/// exit the process itself — this thread never calls `process::exit`
/// directly, since that would be unsound to do from library code.
#[allow(clippy::too_many_arguments)]
pub fn run(
    transport: &dyn PumpInbound,
    md: &MdCache,
    caps: &CapStore,
    flush: &FlushQueue,
    vmap: &VMap,
    kernel: &dyn KernelNotify,
    config: &CoreConfig,
    evicted: &AtomicBool,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match transport.try_recv(POLL_TICK) {
            Ok(Some(frame)) => dispatch(frame, md, caps, flush, vmap, kernel, config, evicted),
            Ok(None) => {}
            Err(e) => {
                warn!(%e, "pump inbound recv failed, reconnecting");
                while !shutdown.load(Ordering::SeqCst) {
                    if transport.reconnect().is_ok() {
                        break;
                    }
                    std::thread::sleep(POLL_TICK);
                }
            }
        }
    }
    info!("inbound demultiplex thread shutting down");
}

fn dispatch(
    frame: Frame,
    md: &MdCache,
    caps: &CapStore,
    flush: &FlushQueue,
    vmap: &VMap,
    kernel: &dyn KernelNotify,
    config: &CoreConfig,
    evicted: &AtomicBool,
) {
    match frame {
        Frame::Evict { reason } => {
            error!(reason, critical = true, "server evicted this client");
            evicted.store(true, Ordering::SeqCst);
        }
        Frame::Lease {
            remote_ino,
            client_id,
            auth_id,
        } => {
            handle_lease(remote_ino, &client_id, &auth_id, md, caps, flush, vmap, kernel, config);
        }
        Frame::Md(_) | Frame::MdMap(_) => {
            if let Err(e) = md.apply(caps, frame) {
                warn!(%e, "pump failed to apply broadcast MD container");
            }
        }
        Frame::Heartbeat(_) | Frame::Cap(_) | Frame::Lock(_) | Frame::Errno(_) => {
            warn!("pump inbound received a container kind that never arrives unsolicited");
        }
    }
}

/// §4.8 `LEASE`: wait for the flush queue to drain for this inode (so a
/// `putMD` still in flight is never revoked out from under it), then forget
/// the cap and invalidate the kernel's view of it.
fn handle_lease(
    remote_ino: u64,
    client_id: &str,
    auth_id: &str,
    md: &MdCache,
    caps: &CapStore,
    flush: &FlushQueue,
    vmap: &VMap,
    kernel: &dyn KernelNotify,
    config: &CoreConfig,
) {
    let local_ino = vmap.backward(remote_ino);
    if local_ino == 0 {
        warn!(remote_ino, "LEASE for an inode with no local mapping, dropping");
        return;
    }

    if !wait_for_drain(flush, local_ino) {
        warn!(local_ino, "LEASE drain wait exceeded its bound, revoking anyway");
    }

    let (capid, cap) = match caps.find_by_fingerprint(local_ino, client_id) {
        Some(found) => found,
        None => {
            warn!(local_ino, client_id, "LEASE for a cap this client no longer holds, ignoring");
            return;
        }
    };
    debug_assert_eq!(cap.lock().unwrap().local_ino, local_ino);

    let revoked_ino = caps.forget(&capid, md);
    // `forget` already recorded `auth_id` (the cap's own, not necessarily the
    // one carried on the wire) in the revocation set; the wire `auth_id` is
    // only used to pick the cap via `find_by_fingerprint` above.
    let _ = auth_id;

    if let Some(ino) = revoked_ino {
        if !config.md_kernelcache {
            return;
        }
        if let Some(handle) = md.peek(ino) {
            let children: Vec<String> = handle.lock().local_children.keys().cloned().collect();
            for name in &children {
                kernel.invalidate_entry(ino, name);
            }
            kernel.invalidate_inode(ino, !md.is_dir(ino));
        }
    }
}

fn wait_for_drain(flush: &FlushQueue, local_ino: u64) -> bool {
    let mut waited = Duration::ZERO;
    while !flush.is_empty_for(local_ino) {
        if waited >= DRAIN_TIMEOUT {
            return false;
        }
        std::thread::sleep(DRAIN_POLL);
        waited += DRAIN_POLL;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::backend::{CapWire, Frame, MdWire, QuotaWire};
    use crate::cap::{CapIdentity, CapStore};
    use crate::kernel::recording::RecordingKernelNotify;
    use crate::kv::NoopKvStore;
    use crate::md::record::Timespec;
    use crate::md::MdCache;
    use std::sync::Arc;

    fn identity() -> CapIdentity {
        CapIdentity {
            login: "alice".into(),
            host: "box1".into(),
            mount_name: "data".into(),
        }
    }

    fn fixtures() -> (Arc<MdCache>, CapStore, Arc<VMap>, Arc<FlushQueue>) {
        let kv: Arc<dyn crate::kv::KvStore> = Arc::new(NoopKvStore);
        let vmap = Arc::new(VMap::new(kv.clone()));
        let flush = Arc::new(FlushQueue::new(1000));
        let backend = Arc::new(MockBackend::new());
        let md = Arc::new(MdCache::new(vmap.clone(), kv, flush.clone(), backend));
        let caps = CapStore::new(identity(), Duration::from_secs(300));
        (md, caps, vmap, flush)
    }

    #[test]
    fn evict_sets_the_evicted_flag_without_touching_caps_or_md() {
        let (md, caps, vmap, flush) = fixtures();
        let kernel = RecordingKernelNotify::new();
        let evicted = AtomicBool::new(false);
        let config = CoreConfig::default();

        dispatch(
            Frame::Evict {
                reason: "client lease expired".into(),
            },
            &md,
            &caps,
            &flush,
            &vmap,
            &kernel,
            &config,
            &evicted,
        );

        assert!(evicted.load(Ordering::SeqCst));
        assert!(kernel.calls().is_empty());
    }

    #[test]
    fn lease_revokes_the_matching_cap_and_invalidates_inode_and_children() {
        let (md, caps, vmap, flush) = fixtures();
        let kernel = RecordingKernelNotify::new();
        let evicted = AtomicBool::new(false);
        let config = CoreConfig::default();

        md.apply(
            &caps,
            Frame::Md(MdWire {
                remote_ino: 0,
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
        // remote 42 maps to local 7 once it is applied under the root.
        md.apply(
            &caps,
            Frame::Md(MdWire {
                remote_ino: 42,
                remote_parent: 0,
                name: "d".into(),
                mode: 0o040_750,
                uid: 1000,
                gid: 1000,
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
        let local_ino = vmap.backward(42);
        assert_ne!(local_ino, 0);
        md.peek(local_ino)
            .unwrap()
            .lock()
            .local_children
            .insert("leaf".into(), 999);

        caps.store(
            local_ino,
            CapWire {
                id: 42,
                mode: crate::cap::R_OK,
                vtime: Timespec { sec: i64::MAX / 2, nsec: 0 },
                uid: 1000,
                gid: 1000,
                client_id: "client-a".into(),
                auth_id: "auth-9".into(),
                client_uuid: "uuid".into(),
                quota_node: 42,
                max_file_size: 0,
                error_code: 0,
                quota: QuotaWire::default(),
            },
            &md,
        );
        assert!(caps.find_by_fingerprint(local_ino, "client-a").is_some());

        dispatch(
            Frame::Lease {
                remote_ino: 42,
                client_id: "client-a".into(),
                auth_id: "auth-9".into(),
            },
            &md,
            &caps,
            &flush,
            &vmap,
            &kernel,
            &config,
            &evicted,
        );

        assert!(caps.find_by_fingerprint(local_ino, "client-a").is_none());
        assert!(caps.is_revoked("auth-9"));
        let calls = kernel.calls();
        assert!(calls.contains(&crate::kernel::recording::Call::Entry(local_ino, "leaf".into())));
        assert!(calls.contains(&crate::kernel::recording::Call::Inode(local_ino, false)));
    }

    #[test]
    fn lease_for_an_unknown_inode_is_dropped_without_panicking() {
        let (md, caps, vmap, flush) = fixtures();
        let kernel = RecordingKernelNotify::new();
        let evicted = AtomicBool::new(false);
        let config = CoreConfig::default();

        dispatch(
            Frame::Lease {
                remote_ino: 999,
                client_id: "client-a".into(),
                auth_id: "auth-1".into(),
            },
            &md,
            &caps,
            &flush,
            &vmap,
            &kernel,
            &config,
            &evicted,
        );

        assert!(kernel.calls().is_empty());
    }

    #[test]
    fn md_frame_is_applied_into_the_cache() {
        let (md, caps, vmap, flush) = fixtures();
        let kernel = RecordingKernelNotify::new();
        let evicted = AtomicBool::new(false);
        let config = CoreConfig::default();

        dispatch(
            Frame::Md(MdWire {
                remote_ino: 0,
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
            &md,
            &caps,
            &flush,
            &vmap,
            &kernel,
            &config,
            &evicted,
        );

        assert!(md.peek(1).is_some());
    }
}
