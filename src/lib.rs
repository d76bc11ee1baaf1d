#![warn(rust_2018_idioms)]

//! Client-side metadata cache and capability-lease subsystem for a FUSE
//! client talking to a remote MD server.
//!
//! This crate implements the hardest slice of such a client: the in-memory
//! inode cache ([`md`]) that must obey kernel-VFS contracts, the local-ino
//! <-> remote-ino mapping ([`vmap`]), the revocable capability-lease
//! protocol ([`cap`]), the bounded write-behind queue that serializes
//! upstream mutations ([`flush`]), and the duplex message loop that
//! reconciles server broadcasts with concurrent kernel requests ([`pump`]).
//!
//! The data-chunk I/O engine, the local file-content cache, credential
//! resolution, configuration parsing, and the CLI front-end that drives the
//! actual FUSE entry points are explicit collaborators this crate never
//! implements; it depends on them only through the narrow traits in
//! [`kernel`] and [`backend`].

#[macro_use]
extern crate failure;

pub mod backend;
pub mod cap;
pub mod config;
mod error;
pub mod flush;
pub mod kernel;
pub mod kv;
pub mod md;
pub mod mount;
pub mod pump;
pub mod req;
pub mod resolver;
pub mod thread_pool;
pub mod vmap;

pub use error::{MdError, MdErrorKind};
pub use req::RequestCtx;
pub use resolver::{Resolver, SetAttr};

/// Result type used throughout this crate.
pub type Result<T> = core::result::Result<T, MdError>;

use crate::backend::{Backend, TcpBackend};
use crate::cap::{CapIdentity, CapStore, QuotaStore};
use crate::config::CoreConfig;
use crate::flush::FlushQueue;
use crate::kernel::KernelNotify;
use crate::kv::{clean_stores, KvStore, SledKvStore};
use crate::md::MdCache;
use crate::mount::MountGuard;
use crate::pump::{HeartbeatIdentity, PumpInbound, PumpOutbound, TcpPumpInbound, TcpPumpOutbound};
use crate::thread_pool::{NaiveThreadPool, ThreadPool};
use crate::vmap::VMap;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// bound on how long [`CoreHandle::shutdown`] waits for every background
/// role to notice the shutdown flag, matching §5's "MessagePump and the cap
/// sweeper respond to a shutdown flag within ≤5s".
const SHUTDOWN_JOIN_BOUND: Duration = Duration::from_secs(5);

/// tracks how many background roles are still running, so `shutdown` can
/// wait for them without a `JoinHandle` (`ThreadPool::spawn` does not hand
/// one back, since not every implementation — `rayon`, the shared-queue
/// pool — has a single OS thread per task to join).
#[derive(Default)]
struct RunningCount {
    count: Mutex<usize>,
    idle: Condvar,
}

impl RunningCount {
    fn spawn_on<P: ThreadPool>(self: &Arc<Self>, pool: &P, f: impl FnOnce() + Send + 'static) {
        *self.count.lock().unwrap() += 1;
        let this = self.clone();
        pool.spawn(move || {
            f();
            *this.count.lock().unwrap() -= 1;
            this.idle.notify_all();
        });
    }

    /// wait until every role has exited or `bound` has elapsed, whichever
    /// comes first.
    fn wait_drained(&self, bound: Duration) {
        let guard = self.count.lock().unwrap();
        let _ = self.idle.wait_timeout_while(guard, bound, |count| *count > 0);
    }
}

/// the process-wide collaborators a mount instance wires together, and the
/// handle the excluded CLI front-end's FUSE entry points reach them
/// through (§9 "Global singletons": this crate passes collaborators
/// explicitly to the [`Resolver`] rather than exposing them as statics, but
/// still needs a single place for the entry points to hold on to).
pub struct CoreHandle<P: ThreadPool = NaiveThreadPool> {
    resolver: Arc<Resolver>,
    md: Arc<MdCache>,
    caps: Arc<CapStore>,
    vmap: Arc<VMap>,
    mount_guard: MountGuard,
    evicted: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    // kept alive for its `Drop` impl (`SharedQueueThreadPool` joins its
    // workers there); never read directly.
    #[allow(dead_code)]
    pool: P,
    running: Arc<RunningCount>,
}

impl<P: ThreadPool> CoreHandle<P> {
    /// bring up every core collaborator for one mount instance: take the
    /// instance lockfile pair, clean stale KV-cache siblings, dial the
    /// Backend and the two pump connections, and spawn the flush worker,
    /// the cap sweeper, and both pump threads.
    ///
    /// `instance_uuid` tags this mount's KV-cache subdirectory (§6); `md_addr`
    /// and `pump_addr` are the Backend RPC and pump-duplex endpoints
    /// respectively (the latter may be the same address as the former on a
    /// single shared connection, but this crate always opens them
    /// independently per §9 "duplex transport thread").
    pub fn start(
        config: CoreConfig,
        identity: CapIdentity,
        heartbeat_identity: HeartbeatIdentity,
        kernel: Arc<dyn KernelNotify>,
        md_addr: impl std::net::ToSocketAddrs,
        pump_addr: impl Into<String> + Clone,
        pool: P,
    ) -> Result<CoreHandle<P>> {
        let mut mount_guard = MountGuard::acquire(&config.kv_cache_dir)?;
        if mount_guard.handoff_needed() {
            // the excluded CLI front-end is responsible for the named-socket
            // fd hand-off (§6); this crate only reports that it is needed.
            return Err(MdErrorKind::Busy.into());
        }

        let kv_dir = config.kv_cache_dir.join(&heartbeat_identity.uuid);
        clean_stores(&config.kv_cache_dir, &heartbeat_identity.uuid)?;
        let kv: Arc<dyn KvStore> = Arc::new(SledKvStore::open(&kv_dir)?);

        let vmap = Arc::new(VMap::new(kv.clone()));
        let flush = Arc::new(FlushQueue::new(10_000));
        let backend: Arc<dyn Backend> = Arc::new(TcpBackend::connect(
            md_addr,
            config.md_backend_timeout,
            config.md_backend_put_timeout,
        )?);
        let md = Arc::new(MdCache::new(vmap.clone(), kv.clone(), flush.clone(), backend.clone()));
        let caps = Arc::new(CapStore::new(identity, config.lease_time));
        let quotas = Arc::new(QuotaStore::new());

        let resolver = Arc::new(Resolver::new(
            md.clone(),
            caps.clone(),
            quotas,
            vmap.clone(),
            flush.clone(),
            backend.clone(),
            kernel.clone(),
            config.clone(),
        ));

        let shutdown = Arc::new(AtomicBool::new(false));
        let evicted = Arc::new(AtomicBool::new(false));
        let running = Arc::new(RunningCount::default());

        Self::spawn_flush_worker(&pool, &running, &md, &flush, &kv, &vmap, &backend, &shutdown);
        Self::spawn_sweeper(&pool, &running, &caps, &md, &kernel, &config, &shutdown);

        let outbound_transport: Arc<dyn PumpOutbound> = Arc::new(TcpPumpOutbound::connect(pump_addr.clone())?);
        Self::spawn_outbound(
            &pool,
            &running,
            &outbound_transport,
            &md,
            &caps,
            &flush,
            heartbeat_identity,
            &config,
            &shutdown,
        );

        let inbound_transport: Arc<dyn PumpInbound> = Arc::new(TcpPumpInbound::connect(pump_addr)?);
        Self::spawn_inbound(
            &pool,
            &running,
            &inbound_transport,
            &md,
            &caps,
            &flush,
            &vmap,
            &kernel,
            &config,
            &evicted,
            &shutdown,
        );

        // the mount/unmount transition (§6) is over now that every
        // collaborator is up; drop to `B`-only for steady state.
        mount_guard.enter_steady_state()?;

        Ok(CoreHandle {
            resolver,
            md,
            caps,
            vmap,
            mount_guard,
            evicted,
            shutdown,
            pool,
            running,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_flush_worker(
        pool: &P,
        running: &Arc<RunningCount>,
        md: &Arc<MdCache>,
        flush: &Arc<FlushQueue>,
        kv: &Arc<dyn KvStore>,
        vmap: &Arc<VMap>,
        backend: &Arc<dyn Backend>,
        shutdown: &Arc<AtomicBool>,
    ) {
        let (md, flush, kv, vmap, backend, shutdown) =
            (md.clone(), flush.clone(), kv.clone(), vmap.clone(), backend.clone(), shutdown.clone());
        running.spawn_on(pool, move || {
            crate::flush::worker::run(&md, &flush, &kv, &vmap, &backend, &shutdown);
        });
    }

    fn spawn_sweeper(
        pool: &P,
        running: &Arc<RunningCount>,
        caps: &Arc<CapStore>,
        md: &Arc<MdCache>,
        kernel: &Arc<dyn KernelNotify>,
        config: &CoreConfig,
        shutdown: &Arc<AtomicBool>,
    ) {
        let (caps, md, kernel, config, shutdown) = (caps.clone(), md.clone(), kernel.clone(), config.clone(), shutdown.clone());
        running.spawn_on(pool, move || {
            crate::cap::sweeper::run(&caps, &md, kernel.as_ref(), &config, &shutdown);
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_outbound(
        pool: &P,
        running: &Arc<RunningCount>,
        transport: &Arc<dyn PumpOutbound>,
        md: &Arc<MdCache>,
        caps: &Arc<CapStore>,
        flush: &Arc<FlushQueue>,
        identity: HeartbeatIdentity,
        config: &CoreConfig,
        shutdown: &Arc<AtomicBool>,
    ) {
        let (transport, md, caps, flush, config, shutdown) =
            (transport.clone(), md.clone(), caps.clone(), flush.clone(), config.clone(), shutdown.clone());
        running.spawn_on(pool, move || {
            crate::pump::run_outbound(transport.as_ref(), &md, &caps, &flush, &identity, &config, &shutdown);
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_inbound(
        pool: &P,
        running: &Arc<RunningCount>,
        transport: &Arc<dyn PumpInbound>,
        md: &Arc<MdCache>,
        caps: &Arc<CapStore>,
        flush: &Arc<FlushQueue>,
        vmap: &Arc<VMap>,
        kernel: &Arc<dyn KernelNotify>,
        config: &CoreConfig,
        evicted: &Arc<AtomicBool>,
        shutdown: &Arc<AtomicBool>,
    ) {
        let (transport, md, caps, flush, vmap, kernel, config, evicted, shutdown) = (
            transport.clone(),
            md.clone(),
            caps.clone(),
            flush.clone(),
            vmap.clone(),
            kernel.clone(),
            config.clone(),
            evicted.clone(),
            shutdown.clone(),
        );
        running.spawn_on(pool, move || {
            crate::pump::run_inbound(
                transport.as_ref(),
                &md,
                &caps,
                &flush,
                &vmap,
                kernel.as_ref(),
                &config,
                &evicted,
                &shutdown,
            );
        });
    }

    /// the Resolver the FUSE entry points call through.
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// the shared MD cache, for entry points that need it directly (e.g.
    /// `statfs`-style aggregate stats) rather than through the Resolver.
    pub fn md_cache(&self) -> &Arc<MdCache> {
        &self.md
    }

    /// the shared cap store, exposed for the same reason as [`Self::md_cache`].
    pub fn cap_store(&self) -> &Arc<CapStore> {
        &self.caps
    }

    /// the shared local<->remote inode table.
    pub fn vmap(&self) -> &Arc<VMap> {
        &self.vmap
    }

    /// whether the MessagePump has observed an `EVICT` frame; the CLI
    /// front-end polls this (or wires its own watcher) to know when to
    /// unmount and exit (§7 "Eviction is unrecoverable").
    pub fn evicted(&self) -> bool {
        self.evicted.load(Ordering::SeqCst)
    }

    /// begin the unmount transition: take lockfile `A` back, signal every
    /// background role to stop, and wait for them to notice. Bounded by the
    /// ≤5s cancellation rule (§5); a role that overruns it is not waited on
    /// further here, matching `ThreadPool::spawn`'s lack of a join handle.
    pub fn shutdown(mut self) {
        let _ = self.mount_guard.begin_unmount();
        self.shutdown.store(true, Ordering::SeqCst);
        self.running.wait_drained(SHUTDOWN_JOIN_BOUND);
    }

    /// terminate the process immediately after an `EVICT` frame (§4.8,
    /// §7). The core itself never calls this from a background thread
    /// (that would be unsound library behavior); it is offered for the CLI
    /// front-end's eviction watcher to call once it has told the kernel to
    /// unmount.
    pub fn exit_evicted() -> ! {
        process::exit(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_count_wait_drained_returns_once_every_role_decrements() {
        let running = Arc::new(RunningCount::default());
        let pool = NaiveThreadPool::new(2).unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));

        let role_shutdown = shutdown.clone();
        running.spawn_on(&pool, move || {
            while !role_shutdown.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
        });

        shutdown.store(true, Ordering::SeqCst);
        running.wait_drained(Duration::from_secs(1));
        assert_eq!(*running.count.lock().unwrap(), 0);
    }

    #[test]
    fn wait_drained_gives_up_at_the_bound_if_a_role_never_exits() {
        let running = Arc::new(RunningCount::default());
        let pool = NaiveThreadPool::new(1).unwrap();

        running.spawn_on(&pool, || std::thread::sleep(Duration::from_secs(60)));

        let start = std::time::Instant::now();
        running.wait_drained(Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
