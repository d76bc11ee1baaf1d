//! The capability expiry sweeper (§4.3): every ~5s, drop every cap whose
//! lease has elapsed and tell the kernel to drop its cached view of the
//! inodes they covered.

use super::store::CapStore;
use crate::config::CoreConfig;
use crate::kernel::KernelNotify;
use crate::md::{MdCache, Timespec};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

const SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// run the sweeper until `shutdown` is set, checking for it at least every
/// [`SHUTDOWN_POLL`] so it honors the ≤5s cancellation bound (§5) even
/// mid-interval.
pub fn run(caps: &CapStore, md: &MdCache, kernel: &dyn KernelNotify, config: &CoreConfig, shutdown: &AtomicBool) {
    let mut slept = Duration::ZERO;
    while !shutdown.load(Ordering::SeqCst) {
        if slept < SWEEP_INTERVAL {
            std::thread::sleep(SHUTDOWN_POLL.min(SWEEP_INTERVAL - slept));
            slept += SHUTDOWN_POLL;
            continue;
        }
        slept = Duration::ZERO;
        sweep_once(caps, md, kernel, config);
    }
}

/// a single pass: snapshot the cap map under its lock (§9 Open Question:
/// this crate takes the copy-then-iterate variant to avoid reentrant
/// locking, not the re-acquire-while-iterating one), then remove and
/// invalidate anything expired.
fn sweep_once(caps: &CapStore, md: &MdCache, kernel: &dyn KernelNotify, config: &CoreConfig) {
    let now = Timespec::now();
    let snapshot = caps.snapshot();

    let expired: Vec<String> = snapshot
        .into_iter()
        .filter(|(_, cap)| !cap.lock().unwrap().valid(now))
        .map(|(id, _)| id)
        .collect();
    if expired.is_empty() {
        return;
    }

    let inos = caps.remove_expired(&expired, md);
    debug!(count = inos.len(), "sweeper expired caps");

    if !config.md_kernelcache {
        return;
    }
    for ino in inos {
        let is_file = !md.is_dir(ino);
        kernel.invalidate_inode(ino, is_file);
    }
}
