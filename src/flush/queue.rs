//! The bounded, coalescing write-behind queue of MD mutations (§4.6).

use crate::md::record::MdOp;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// one pending upstream action for an inode. `op` is never `MdOp::None`.
#[derive(Debug, Clone)]
pub struct FlushEntry {
    /// auth-id authorizing this mutation.
    pub auth_id: String,
    /// the action: `Add`, `Update`, `Rm`, or `LStore`.
    pub op: MdOp,
}

struct Inner {
    per_ino: HashMap<u64, VecDeque<FlushEntry>>,
    order: VecDeque<u64>,
    queued: HashSet<u64>,
    in_flight: HashSet<u64>,
    total_len: usize,
}

/// bounded, per-inode-FIFO write-behind queue. Pushes from the Resolver are
/// subject to a high-water mark and block (bounded, ~25ms poll) once it is
/// reached; pushes originating from the MessagePump (server-initiated)
/// bypass the limit so a busy queue never stalls server broadcasts.
pub struct FlushQueue {
    inner: Mutex<Inner>,
    not_full: Condvar,
    not_empty: Condvar,
    high_water: usize,
}

impl FlushQueue {
    /// a queue that backpressures producers once `high_water` entries are
    /// outstanding across all inodes.
    pub fn new(high_water: usize) -> Self {
        FlushQueue {
            inner: Mutex::new(Inner {
                per_ino: HashMap::new(),
                order: VecDeque::new(),
                queued: HashSet::new(),
                in_flight: HashSet::new(),
                total_len: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            high_water,
        }
    }

    /// enqueue `entry` for `local_ino`. Blocks with a ~25ms poll interval
    /// while the queue is at its high-water mark, unless `server_initiated`.
    pub fn push(&self, local_ino: u64, entry: FlushEntry, server_initiated: bool) {
        let mut inner = self.inner.lock().unwrap();
        if !server_initiated {
            while inner.total_len >= self.high_water {
                let (guard, _) = self
                    .not_full
                    .wait_timeout(inner, Duration::from_millis(25))
                    .unwrap();
                inner = guard;
            }
        }

        let fifo = inner.per_ino.entry(local_ino).or_insert_with(VecDeque::new);
        fifo.push_back(entry);
        inner.total_len += 1;
        if inner.queued.insert(local_ino) {
            inner.order.push_back(local_ino);
        }
        drop(inner);
        self.not_empty.notify_all();
    }

    /// pop the next inode with pending work and its coalesced FIFO (§4.6).
    /// Blocks (≤200ms poll) until work arrives or `shutdown` is set.
    pub fn pop_coalesced(&self, shutdown: &AtomicBool) -> Option<(u64, Vec<FlushEntry>)> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(local_ino) = inner.order.pop_front() {
                inner.queued.remove(&local_ino);
                inner.in_flight.insert(local_ino);
                let fifo = inner.per_ino.remove(&local_ino).unwrap_or_default();
                inner.total_len -= fifo.len();
                drop(inner);
                self.not_full.notify_all();
                return Some((local_ino, coalesce(fifo)));
            }
            if shutdown.load(Ordering::SeqCst) {
                return None;
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(inner, Duration::from_millis(200))
                .unwrap();
            inner = guard;
        }
    }

    /// whether any entry is still pending or in flight for `local_ino`. Used
    /// by `forget` and by the `LEASE` drain wait — a batch `pop_coalesced`
    /// already dequeued but hasn't finished applying still counts as
    /// outstanding, so a revocation can never race an in-flight `putMD`.
    pub fn is_empty_for(&self, local_ino: u64) -> bool {
        let inner = self.inner.lock().unwrap();
        !inner.per_ino.contains_key(&local_ino) && !inner.in_flight.contains(&local_ino)
    }

    /// mark `local_ino`'s popped batch as fully applied. Called by the flush
    /// worker once every entry in a `pop_coalesced` batch has been applied,
    /// so `is_empty_for` stops reporting it as outstanding.
    pub fn mark_done(&self, local_ino: u64) {
        self.inner.lock().unwrap().in_flight.remove(&local_ino);
    }

    /// total number of entries outstanding across every inode, for the
    /// heartbeat statistics block (§4.8).
    pub fn depth(&self) -> u64 {
        self.inner.lock().unwrap().total_len as u64
    }
}

/// apply the §4.6 coalescing rules to one inode's FIFO.
fn coalesce(fifo: VecDeque<FlushEntry>) -> Vec<FlushEntry> {
    if let Some(last) = fifo.back() {
        if last.op == MdOp::Rm {
            return vec![last.clone()];
        }
    }

    let mut out: Vec<FlushEntry> = Vec::with_capacity(fifo.len());
    for entry in fifo {
        match (out.last().map(|o: &FlushEntry| o.op), entry.op) {
            (Some(MdOp::LStore), MdOp::LStore) => {
                *out.last_mut().unwrap() = entry;
            }
            (Some(MdOp::Add), MdOp::Update) => {
                // the create still carries the update; drop the entry.
            }
            (Some(MdOp::Update), MdOp::Update) => {
                *out.last_mut().unwrap() = entry;
            }
            _ => out.push(entry),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(auth: &str, op: MdOp) -> FlushEntry {
        FlushEntry {
            auth_id: auth.to_string(),
            op,
        }
    }

    #[test]
    fn trailing_rm_supersedes_everything() {
        let fifo = VecDeque::from(vec![
            entry("a", MdOp::Add),
            entry("a", MdOp::Update),
            entry("a", MdOp::Rm),
        ]);
        let out = coalesce(fifo);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].op, MdOp::Rm);
    }

    #[test]
    fn add_then_update_stays_add() {
        let fifo = VecDeque::from(vec![entry("a", MdOp::Add), entry("a", MdOp::Update)]);
        let out = coalesce(fifo);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].op, MdOp::Add);
    }

    #[test]
    fn duplicate_updates_collapse() {
        let fifo = VecDeque::from(vec![
            entry("a", MdOp::Update),
            entry("a", MdOp::Update),
            entry("b", MdOp::Update),
        ]);
        let out = coalesce(fifo);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].auth_id, "b");
    }

    #[test]
    fn duplicate_lstores_collapse() {
        let fifo = VecDeque::from(vec![entry("a", MdOp::LStore), entry("a", MdOp::LStore)]);
        assert_eq!(coalesce(fifo).len(), 1);
    }

    #[test]
    fn different_inodes_stay_independent() {
        let q = FlushQueue::new(100);
        q.push(2, entry("a", MdOp::Add), false);
        q.push(3, entry("b", MdOp::Add), false);

        let shutdown = AtomicBool::new(false);
        let (first, _) = q.pop_coalesced(&shutdown).unwrap();
        let (second, _) = q.pop_coalesced(&shutdown).unwrap();
        assert_eq!(first, 2);
        assert_eq!(second, 3);
    }

    #[test]
    fn server_initiated_push_bypasses_the_high_water_mark() {
        let q = FlushQueue::new(1);
        q.push(2, entry("a", MdOp::Add), false);
        // would block if not server-initiated, since high_water == 1
        q.push(2, entry("a", MdOp::Update), true);

        let shutdown = AtomicBool::new(false);
        let (ino, batch) = q.pop_coalesced(&shutdown).unwrap();
        assert_eq!(ino, 2);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].op, MdOp::Add);
    }

    #[test]
    fn pop_returns_none_once_shutdown_and_drained() {
        let q = FlushQueue::new(100);
        let shutdown = AtomicBool::new(true);
        assert!(q.pop_coalesced(&shutdown).is_none());
    }
}
