use super::ThreadPool;
use crate::error::MdErrorKind;
use crate::Result;
use failure::ResultExt;
use rayon::{self, ThreadPoolBuilder};

/// Thread pool backed by `rayon`. Useful where the caller wants work-stealing
/// among the background roles rather than a dedicated thread per role.
pub struct RayonThreadPool {
    pool: rayon::ThreadPool,
}

impl ThreadPool for RayonThreadPool {
    fn new(capacity: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(capacity)
            .build()
            .context(MdErrorKind::Transport)?;

        Ok(Self { pool })
    }

    fn spawn<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.pool.spawn(f);
    }
}
