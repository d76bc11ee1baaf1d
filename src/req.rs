//! The caller context threaded through every Resolver/CapStore/MDCache
//! operation (§4.3, §4.5): the uid/gid/pid the kernel attached to the
//! originating FUSE request, plus the client identity used to compose cap
//! ids. Credential resolution itself is an excluded collaborator (§1); this
//! crate only carries the resolved fields.

/// caller context for one FUSE entry point.
#[derive(Debug, Clone)]
pub struct RequestCtx {
    /// caller uid.
    pub uid: u32,
    /// caller gid.
    pub gid: u32,
    /// caller pid, used only for advisory-lock bookkeeping.
    pub pid: u32,
    /// this mount instance's client identity, folded into `capid`.
    pub client_id: String,
}

impl RequestCtx {
    /// a context for the given caller, attributed to `client_id`.
    pub fn new(uid: u32, gid: u32, pid: u32, client_id: impl Into<String>) -> Self {
        RequestCtx {
            uid,
            gid,
            pid,
            client_id: client_id.into(),
        }
    }
}
