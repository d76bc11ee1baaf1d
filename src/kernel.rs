//! The kernel-invalidation shim (§6 external interface): the only way this
//! crate talks back to the kernel's inode/dentry cache. The real ioctl-based
//! implementation is an excluded collaborator (§1); this crate depends on
//! it only through the `KernelNotify` trait, so the Resolver and the cap
//! sweeper never need to know how invalidation is actually delivered.

/// out-call to the kernel's inode/dentry cache. Implementations must be
/// callable from a thread other than the one handling the originating FUSE
/// request, to avoid the reentrant-invalidation deadlock the real shim
/// documents. Both calls are best-effort: a failure is logged by the
/// implementation, never surfaced to the caller (§7).
pub trait KernelNotify: Send + Sync {
    /// drop the kernel's cached attributes for `ino`. `is_file` selects
    /// between the file and directory invalidation path the real shim
    /// exposes as distinct ioctls.
    fn invalidate_inode(&self, ino: u64, is_file: bool);

    /// drop the kernel's cached dentry `name` under `parent_ino`.
    fn invalidate_entry(&self, parent_ino: u64, name: &str);
}

/// a `KernelNotify` that does nothing, for configurations with
/// `md-kernelcache` disabled and for tests that do not exercise
/// invalidation delivery.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopKernelNotify;

impl KernelNotify for NoopKernelNotify {
    fn invalidate_inode(&self, _ino: u64, _is_file: bool) {}
    fn invalidate_entry(&self, _parent_ino: u64, _name: &str) {}
}
