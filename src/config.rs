use std::path::PathBuf;
use std::time::Duration;

/// Core configuration, read once at mount startup by the excluded CLI/config
/// front-end and handed to the core as a plain struct. This crate never
/// parses a config file itself.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// lifetime of a freshly-acquired or implied capability.
    pub lease_time: Duration,
    /// cadence of outbound `HEARTBEAT` frames.
    pub heartbeat_interval: Duration,
    /// timeout for read-ish backend RPCs (`getMD`, `getCAP`, ...).
    pub md_backend_timeout: Duration,
    /// timeout for `putMD`.
    pub md_backend_put_timeout: Duration,
    /// if false, the Resolver suppresses kernel-invalidation calls.
    pub md_kernelcache: bool,
    /// root directory for the per-uuid KVStore spill.
    pub kv_cache_dir: PathBuf,
    /// whether nested mounts under this one are recognized.
    pub submounts: bool,
    /// whether `flush` waits for outstanding writes before returning.
    pub flush_wait_open: bool,
    /// whether `rename` blocks for the upstream RPC before returning.
    pub rename_is_sync: bool,
    /// whether `rmdir` blocks for the upstream RPC before returning.
    pub rmdir_is_sync: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            lease_time: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(30),
            md_backend_timeout: Duration::from_secs(86_400),
            md_backend_put_timeout: Duration::from_secs(120),
            md_kernelcache: true,
            kv_cache_dir: PathBuf::from("/var/run/mdcore"),
            submounts: false,
            flush_wait_open: false,
            rename_is_sync: false,
            rmdir_is_sync: true,
        }
    }
}
