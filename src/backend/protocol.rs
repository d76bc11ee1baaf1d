//! Wire containers exchanged with the MD server (§6), and the length-prefixed
//! `serde_json` framing they are carried in.
//!
//! §1 records the substitution this crate makes for the original ZMQ dealer
//! transport: nothing in this codebase's lineage depends on a ZMQ crate, so
//! frames are instead carried as a `u64` network-endian length prefix
//! followed by a `serde_json`-encoded [`Frame`], exactly the way this
//! codebase already frames its one piece of wire protocol.

use crate::md::record::Timespec;
use crate::Result;
use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

/// the MD attribute set as carried on the wire, keyed by remote ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MdWire {
    /// remote-ino of this entry.
    pub remote_ino: u64,
    /// remote-ino of its parent.
    pub remote_parent: u64,
    /// entry name within its parent.
    pub name: String,
    /// POSIX mode bits.
    pub mode: u32,
    /// owning uid.
    pub uid: u32,
    /// owning gid.
    pub gid: u32,
    /// size in bytes.
    pub size: u64,
    /// last-access time.
    pub atime: Timespec,
    /// last-modification time.
    pub mtime: Timespec,
    /// last-status-change time.
    pub ctime: Timespec,
    /// creation time.
    pub btime: Timespec,
    /// hard-link count.
    pub nlink: u32,
    /// symlink target, if any.
    pub target: Option<String>,
    /// extended attributes.
    pub xattr: HashMap<String, Vec<u8>>,
    /// opaque flag bits.
    pub flags: u32,
    /// capability embedded in this response, if the server chose to piggy-back one.
    pub cap: Option<CapWire>,
}

/// a listing response: the parent plus its current children.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MdMapWire {
    /// the remote-ino this listing refreshes.
    pub reference_ino: u64,
    /// name -> child MD, for every child currently known to the server.
    pub children: HashMap<String, MdWire>,
}

/// quota payload embedded in a `CAP` container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QuotaWire {
    /// quota-node remote-ino this quota is scoped to.
    pub quota_node: u64,
    /// maximum bytes permitted under this node.
    pub max_volume: u64,
    /// maximum inode count permitted under this node.
    pub max_inodes: u64,
}

/// a capability as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapWire {
    /// remote-ino this cap authorizes operations on.
    pub id: u64,
    /// granted mode mask.
    pub mode: u32,
    /// lease expiry.
    pub vtime: Timespec,
    /// owning uid.
    pub uid: u32,
    /// owning gid.
    pub gid: u32,
    /// opaque client identity.
    pub client_id: String,
    /// opaque auth identity, used for revocation.
    pub auth_id: String,
    /// uuid of the client instance this cap was issued to.
    pub client_uuid: String,
    /// remote-ino of the quota node this cap is scoped under.
    pub quota_node: u64,
    /// maximum file size hint.
    pub max_file_size: u64,
    /// server-reported error code, `0` on success.
    pub error_code: i32,
    /// quota payload, refreshed into the local `QuotaStore` record.
    pub quota: QuotaWire,
}

/// lock request/response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LockType {
    /// read lock.
    RdLck,
    /// write lock.
    WrLck,
    /// unlock.
    Unlck,
}

/// a POSIX advisory lock record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockWire {
    /// owning process id.
    pub pid: u32,
    /// starting offset.
    pub start: u64,
    /// length, `0` meaning "to EOF".
    pub len: u64,
    /// lock type.
    pub ty: LockType,
    /// server-reported error code.
    pub err_no: i32,
}

/// heartbeat statistics block.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Statistics {
    /// number of MD records currently cached.
    pub cached_mds: u64,
    /// number of live caps.
    pub live_caps: u64,
    /// current flush-queue depth.
    pub flush_depth: u64,
}

/// outbound heartbeat payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatWire {
    /// client name (mount name).
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
    /// client clock at send time.
    pub clock: Timespec,
    /// aggregated client statistics.
    pub stats: Statistics,
}

/// every typed message exchanged with the MD server (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Frame {
    /// outbound liveness/statistics beacon.
    Heartbeat(HeartbeatWire),
    /// a single MD record.
    Md(MdWire),
    /// a parent + its children.
    MdMap(MdMapWire),
    /// a capability.
    Cap(CapWire),
    /// the server is terminating this client.
    Evict {
        /// human-readable reason, logged before exit.
        reason: String,
    },
    /// a capability-lease revocation.
    Lease {
        /// remote-ino the lease covers.
        remote_ino: u64,
        /// client identity the lease was issued to.
        client_id: String,
        /// auth identity to revoke.
        auth_id: String,
    },
    /// a POSIX advisory lock request/response.
    Lock(LockWire),
    /// a bare errno response to a request (no payload container applies).
    Errno(i32),
}

/// read one length-prefixed, `serde_json`-encoded message from `reader`.
/// Generic over the payload type so both [`Frame`] (server -> client) and
/// [`super::client::Request`] (client -> server) share one wire encoding,
/// the way this codebase's one piece of network code already frames its
/// single `Command`/`Response` pair.
pub fn read_message<T, R>(reader: &mut R) -> Result<T>
where
    T: serde::de::DeserializeOwned,
    R: Read,
{
    let mut len_buf = [0u8; 8];
    reader.read_exact(&mut len_buf)?;
    let len = Cursor::new(&len_buf[..]).read_u64::<NetworkEndian>()?;

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;

    let value: T = serde_json::from_slice(&body)?;
    Ok(value)
}

/// write one length-prefixed, `serde_json`-encoded message to `writer`.
pub fn write_message<T, W>(writer: &mut W, value: &T) -> Result<()>
where
    T: Serialize,
    W: Write,
{
    let body = serde_json::to_vec(value)?;

    let mut len_buf = Vec::with_capacity(8);
    len_buf.write_u64::<NetworkEndian>(body.len() as u64)?;

    writer.write_all(&len_buf)?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_through_the_wire_encoding() {
        let frame = Frame::Evict {
            reason: "client lease expired".into(),
        };
        let mut buf = Vec::new();
        write_message(&mut buf, &frame).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: Frame = read_message(&mut cursor).unwrap();
        assert_eq!(decoded, frame);
    }
}
