use super::ThreadPool;
use crate::Result;
use std::thread;

/// Thread pool that spawns a brand new OS thread per task and never reuses
/// it. Suitable for the core's background roles, which spawn a handful of
/// long-lived loops rather than a stream of short tasks.
pub struct NaiveThreadPool;

impl ThreadPool for NaiveThreadPool {
    fn new(_capacity: usize) -> Result<Self> {
        Ok(NaiveThreadPool)
    }

    fn spawn<F: FnOnce() + Send + 'static>(&self, f: F) {
        thread::spawn(f);
    }
}
