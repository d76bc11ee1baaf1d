//! Process-wide mount-instance arbitration (§6 "Instance singleton"): the
//! lockfile pair (`A`, `B`) a new mount process takes before it may bind to
//! the kernel FUSE channel.

use crate::Result;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// the two lockfiles this crate arbitrates concurrent mount instances with.
/// `A+B` is held during the mount/unmount transition; only `B` during
/// steady state; only `A` during unmount. The FD hand-off socket a real
/// instance falls back to on a failed `A` acquisition belongs to the
/// excluded CLI front-end (§6); this type surfaces that case only as
/// `handoff_needed()`.
pub struct MountGuard {
    a: File,
    b: File,
    a_held: bool,
    b_held: bool,
    handoff_needed: bool,
}

impl MountGuard {
    fn lock_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(name)
    }

    /// attempt to take both locks for a fresh mount instance rooted at
    /// `dir`. If `A` is already held by another instance, the returned
    /// guard holds neither lock and reports `handoff_needed() == true`;
    /// the caller is then expected to request the existing FUSE fd over
    /// the named socket instead of mounting.
    pub fn acquire(dir: impl AsRef<Path>) -> Result<MountGuard> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let a = OpenOptions::new()
            .create(true)
            .write(true)
            .open(Self::lock_path(dir, "A"))?;
        let b = OpenOptions::new()
            .create(true)
            .write(true)
            .open(Self::lock_path(dir, "B"))?;

        if a.try_lock_exclusive().is_err() {
            return Ok(MountGuard {
                a,
                b,
                a_held: false,
                b_held: false,
                handoff_needed: true,
            });
        }
        if b.try_lock_exclusive().is_err() {
            let _ = FileExt::unlock(&a);
            return Ok(MountGuard {
                a,
                b,
                a_held: false,
                b_held: false,
                handoff_needed: true,
            });
        }

        Ok(MountGuard {
            a,
            b,
            a_held: true,
            b_held: true,
            handoff_needed: false,
        })
    }

    /// whether this instance lost the race for `A` and must fall back to
    /// receiving an existing FUSE fd instead of mounting.
    pub fn handoff_needed(&self) -> bool {
        self.handoff_needed
    }

    /// transition from the mount phase (`A+B`) to steady state (`B` only).
    pub fn enter_steady_state(&mut self) -> Result<()> {
        if self.a_held {
            FileExt::unlock(&self.a)?;
            self.a_held = false;
        }
        Ok(())
    }

    /// transition from steady state to the unmount phase (`A` only).
    pub fn begin_unmount(&mut self) -> Result<()> {
        if !self.a_held {
            self.a.try_lock_exclusive()?;
            self.a_held = true;
        }
        Ok(())
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        if self.b_held {
            let _ = FileExt::unlock(&self.b);
        }
        if self.a_held {
            let _ = FileExt::unlock(&self.a);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_fresh_directory_grants_both_locks() {
        let dir = tempfile::tempdir().unwrap();
        let guard = MountGuard::acquire(dir.path()).unwrap();
        assert!(!guard.handoff_needed());
    }

    #[test]
    fn a_second_instance_needs_handoff() {
        let dir = tempfile::tempdir().unwrap();
        let first = MountGuard::acquire(dir.path()).unwrap();
        assert!(!first.handoff_needed());

        let second = MountGuard::acquire(dir.path()).unwrap();
        assert!(second.handoff_needed());
    }

    #[test]
    fn steady_state_still_blocks_a_second_instance_via_b() {
        let dir = tempfile::tempdir().unwrap();
        let mut guard = MountGuard::acquire(dir.path()).unwrap();
        guard.enter_steady_state().unwrap(); // releases A, keeps B

        // A second instance can now take A (nobody holds it) but must still fail on
        // B, which this instance keeps held for its entire steady-state lifetime.
        let other = MountGuard::acquire(dir.path()).unwrap();
        assert!(other.handoff_needed());

        guard.begin_unmount().unwrap();
    }
}
