//! The capability record and its identity (§3, §4.3).

use crate::md::record::Timespec;

/// read permission bit, matching POSIX `access(2)`'s `R_OK`.
pub const R_OK: u32 = 0b100;
/// write permission bit, matching POSIX `access(2)`'s `W_OK`.
pub const W_OK: u32 = 0b010;
/// execute/traverse permission bit, matching POSIX `access(2)`'s `X_OK`.
pub const X_OK: u32 = 0b001;

/// process-wide identity fields folded into every cap id (§9 Open
/// Questions: this crate picks the long format, including host and mount
/// name, since it is the more specific of the two formats the original
/// sources use and never collides across mounts on the same host).
#[derive(Debug, Clone)]
pub struct CapIdentity {
    /// local login name.
    pub login: String,
    /// local hostname.
    pub host: String,
    /// name of this mount.
    pub mount_name: String,
}

impl CapIdentity {
    /// `capid = "<ino-hex>:<uid>:<gid>:<login>@<host>:<mount-name>"`.
    pub fn capid(&self, local_ino: u64, uid: u32, gid: u32) -> String {
        format!(
            "{:x}:{}:{}:{}@{}:{}",
            local_ino, uid, gid, self.login, self.host, self.mount_name
        )
    }
}

/// a capability: a short-lived authorization attached to an inode and a
/// client, granting a mode mask.
#[derive(Debug, Clone)]
pub struct Cap {
    /// the fingerprint this cap was created for.
    pub local_ino: u64,
    /// owning uid.
    pub uid: u32,
    /// owning gid.
    pub gid: u32,
    /// opaque client identity.
    pub client_id: String,
    /// opaque auth identity, used for revocation.
    pub auth_id: String,
    /// granted mode mask.
    pub mode: u32,
    /// lease expiry; the cap is valid iff this is strictly in the future.
    pub vtime: Timespec,
    /// remote-ino of the quota node this cap is scoped under.
    pub quota_node: u64,
    /// quota limits embedded in the cap, refreshed into `QuotaStore`.
    pub quota_max_volume: u64,
    /// quota limits embedded in the cap, refreshed into `QuotaStore`.
    pub quota_max_inodes: u64,
    /// last error observed acquiring or refreshing this cap.
    pub errc: i32,
    /// maximum file size hint from the server.
    pub max_file_size: u64,
    /// time this cap was last successfully acquired.
    pub last_use: Timespec,
}

impl Cap {
    /// a brand-new, not-yet-valid cap for the given fingerprint.
    pub fn new(local_ino: u64, uid: u32, gid: u32, client_id: String) -> Self {
        Cap {
            local_ino,
            uid,
            gid,
            client_id,
            auth_id: String::new(),
            mode: 0,
            vtime: Timespec::default(),
            quota_node: 0,
            quota_max_volume: 0,
            quota_max_inodes: 0,
            errc: 0,
            max_file_size: 0,
            last_use: Timespec::default(),
        }
    }

    /// a cap is valid iff its lease has not yet expired.
    pub fn valid(&self, now: Timespec) -> bool {
        self.vtime > now
    }

    /// a cap satisfies a requested mode iff every requested bit is granted.
    pub fn satisfy(&self, requested: u32) -> bool {
        self.mode & requested == requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_iff_vtime_in_the_future() {
        let now = Timespec { sec: 1000, nsec: 0 };
        let mut cap = Cap::new(2, 0, 0, "client".into());

        cap.vtime = Timespec { sec: 999, nsec: 0 };
        assert!(!cap.valid(now));

        cap.vtime = Timespec {
            sec: 1000,
            nsec: 0,
        };
        assert!(!cap.valid(now), "vtime == now must not be valid");

        cap.vtime = Timespec {
            sec: 1001,
            nsec: 0,
        };
        assert!(cap.valid(now));
    }

    #[test]
    fn satisfy_requires_every_requested_bit() {
        let mut cap = Cap::new(2, 0, 0, "client".into());
        cap.mode = R_OK;
        assert!(cap.satisfy(R_OK));
        assert!(!cap.satisfy(R_OK | W_OK));

        cap.mode = R_OK | W_OK;
        assert!(cap.satisfy(R_OK | W_OK));
    }

    #[test]
    fn capid_is_stable_for_the_same_fingerprint() {
        let identity = CapIdentity {
            login: "alice".into(),
            host: "box1".into(),
            mount_name: "data".into(),
        };
        assert_eq!(
            identity.capid(0x2a, 1000, 1000),
            identity.capid(0x2a, 1000, 1000)
        );
        assert_ne!(identity.capid(0x2a, 1000, 1000), identity.capid(0x2b, 1000, 1000));
    }
}
