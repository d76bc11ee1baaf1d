//! This module contains the core's `ThreadPool` trait and several
//! implementations. Every long-lived background role the core spawns (the
//! flush worker, the cap sweeper, the two message-pump threads) is spawned
//! through one of these rather than an ad hoc `thread::spawn`, so that the
//! deployment can swap the dispatch strategy without touching the workers
//! themselves.

use crate::Result;

/// A pool capable of spawning and managing threads to perform tasks.
pub trait ThreadPool: Send + Sync + 'static {
    /// create a new instance with the given number of threads
    fn new(capacity: usize) -> Result<Self>
    where
        Self: Sized;

    /// run the given task on a thread in the pool
    fn spawn<F: FnOnce() + Send + 'static>(&self, f: F);
}

mod naive;
mod rayon_pool;
mod shared_queue;

pub use naive::NaiveThreadPool;
pub use rayon_pool::RayonThreadPool;
pub use shared_queue::SharedQueueThreadPool;
