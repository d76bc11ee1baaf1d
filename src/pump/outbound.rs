//! Outbound heartbeat thread (§4.8): emit a `HEARTBEAT` frame carrying
//! aggregated client statistics every `heartbeat_interval`, reconnecting
//! with exponential backoff on transport failure.

use super::transport::PumpOutbound;
use crate::backend::{HeartbeatWire, Statistics};
use crate::cap::CapStore;
use crate::config::CoreConfig;
use crate::flush::FlushQueue;
use crate::md::{MdCache, Timespec};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// identity fields folded into every heartbeat, fixed for the life of the
/// mount instance.
#[derive(Debug, Clone)]
pub struct HeartbeatIdentity {
    /// mount name.
    pub name: String,
    /// client hostname.
    pub host: String,
    /// client instance uuid.
    pub uuid: String,
    /// crate version string.
    pub version: String,
    /// client process id.
    pub pid: u32,
    /// process start time.
    pub start_time: Timespec,
}

/// drive `transport` until `shutdown` is set, checking for it at least every
/// [`SHUTDOWN_POLL`] so it honors the ≤5s cancellation bound (§5) even
/// mid-interval.
#[allow(clippy::too_many_arguments)]
pub fn run(
    transport: &dyn PumpOutbound,
    md: &MdCache,
    caps: &CapStore,
    flush: &FlushQueue,
    identity: &HeartbeatIdentity,
    config: &CoreConfig,
    shutdown: &AtomicBool,
) {
    let mut backoff = BACKOFF_INITIAL;
    let mut slept = Duration::ZERO;

    while !shutdown.load(Ordering::SeqCst) {
        if slept < config.heartbeat_interval {
            std::thread::sleep(SHUTDOWN_POLL.min(config.heartbeat_interval - slept));
            slept += SHUTDOWN_POLL;
            continue;
        }
        slept = Duration::ZERO;

        let hb = HeartbeatWire {
            name: identity.name.clone(),
            host: identity.host.clone(),
            uuid: identity.uuid.clone(),
            version: identity.version.clone(),
            pid: identity.pid,
            start_time: identity.start_time,
            clock: Timespec::now(),
            stats: Statistics {
                cached_mds: md.cached_count(),
                live_caps: caps.live_count(),
                flush_depth: flush.depth(),
            },
        };

        match transport.send_heartbeat(&hb) {
            Ok(()) => backoff = BACKOFF_INITIAL,
            Err(e) => {
                warn!(%e, "heartbeat send failed, reconnecting");
                reconnect_with_backoff(transport, &mut backoff, shutdown);
            }
        }
    }
    info!("outbound heartbeat thread shutting down");
}

/// retry `transport.reconnect()` with exponentially increasing backoff
/// (capped at [`BACKOFF_MAX`]) until it succeeds or `shutdown` is set. After
/// a successful reconnect the server either accepts the client's last-known
/// clock on the next heartbeat or answers `EVICT` if it discarded the client
/// while disconnected (§4.8) — either way the inbound thread, not this one,
/// observes the outcome.
fn reconnect_with_backoff(transport: &dyn PumpOutbound, backoff: &mut Duration, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::SeqCst) {
        match transport.reconnect() {
            Ok(()) => return,
            Err(e) => {
                warn!(%e, backoff_ms = backoff.as_millis() as u64, "pump reconnect failed, backing off");
                std::thread::sleep(*backoff);
                *backoff = (*backoff * 2).min(BACKOFF_MAX);
            }
        }
    }
}
