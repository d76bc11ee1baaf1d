//! The synchronous request/response transport to the MD server (§4.7, §6).

use super::protocol::{read_message, write_message, CapWire, Frame, LockWire, MdWire};
use crate::error::MdErrorKind;
use crate::md::record::Timespec;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;

/// the `op` a `putMD` request carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PutOp {
    /// create or update.
    Set,
    /// remove.
    Delete,
}

/// one request verb issued to the MD server (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// `getMD("/")`.
    GetMdRoot,
    /// `getMD(remote_parent, name)`.
    GetMdByParentName { remote_parent: u64, name: String },
    /// `getMD(remote_ino, clock)`, conditional on the client's last-seen clock.
    GetMdConditional { remote_ino: u64, clock: Timespec },
    /// `getCAP(remote_ino)`.
    GetCap { remote_ino: u64 },
    /// `putMD(md, auth_id)`.
    PutMd {
        md: MdWire,
        auth_id: String,
        op: PutOp,
    },
    /// `setlk(md)`.
    SetLk { remote_ino: u64, lock: LockWire },
    /// `getlk(md)`.
    GetLk { remote_ino: u64, lock: LockWire },
}

/// a response to any [`Request`]: either a typed container or a bare errno.
pub type Response = Frame;

/// request/response transport to the MD server. Implementations may block
/// the calling thread but must not be called while holding any per-MD lock
/// (§5).
pub trait Backend: Send + Sync {
    /// issue `request` and wait for the matching response, or time out.
    fn call(&self, request: Request) -> Result<Response>;
}

/// `Backend` over a single TCP connection, framed with the length-prefixed
/// `serde_json` envelope from [`super::protocol`]. Requests and responses
/// are paired 1:1 on one connection, matching the synchronous-RPC
/// requirement in §4.7/§5; a coarse lock serializes concurrent callers the
/// same way the cap-map and table locks serialize their own operations.
pub struct TcpBackend {
    stream: Mutex<TcpStream>,
    put_timeout: Duration,
    read_timeout: Duration,
}

impl TcpBackend {
    /// connect to `addr`, applying `read_timeout`/`put_timeout` to the
    /// underlying socket for the respective request classes.
    pub fn connect(
        addr: impl ToSocketAddrs,
        read_timeout: Duration,
        put_timeout: Duration,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        Ok(TcpBackend {
            stream: Mutex::new(stream),
            put_timeout,
            read_timeout,
        })
    }

    fn timeout_for(request: &Request, put_timeout: Duration, read_timeout: Duration) -> Duration {
        match request {
            Request::PutMd { .. } => put_timeout,
            _ => read_timeout,
        }
    }
}

impl Backend for TcpBackend {
    fn call(&self, request: Request) -> Result<Response> {
        let stream = self.stream.lock().unwrap();
        let timeout = Self::timeout_for(&request, self.put_timeout, self.read_timeout);
        stream.set_read_timeout(Some(timeout)).ok();
        stream.set_write_timeout(Some(timeout)).ok();

        let mut writer = BufWriter::new(&*stream);
        write_message(&mut writer, &request).map_err(|_| MdErrorKind::Transport)?;

        let mut reader = BufReader::new(&*stream);
        let response: Response = read_message(&mut reader).map_err(|e| match e.kind() {
            MdErrorKind::Io => MdErrorKind::TimedOut,
            other => other,
        })?;
        Ok(response)
    }
}

pub mod mock {
    //! An in-process stand-in for the MD server, used by this crate's own
    //! tests. Building a real MD server is an explicit Non-goal (§1); this
    //! type only ever plays back canned responses to requests it is told
    //! to expect.
    use super::*;
    use std::collections::VecDeque;

    /// a scripted `Backend`: each call pops the next queued response (or
    /// fails if the queue is empty).
    pub struct MockBackend {
        responses: Mutex<VecDeque<Result<Response>>>,
        pub requests: Mutex<Vec<Request>>,
        next_call_delay: Mutex<Option<Duration>>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            MockBackend {
                responses: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
                next_call_delay: Mutex::new(None),
            }
        }

        pub fn push_response(&self, response: Result<Response>) {
            self.responses.lock().unwrap().push_back(response);
        }

        /// sleep for `delay` before returning the next call's response, to
        /// simulate an in-flight RPC a concurrent caller must wait out.
        pub fn delay_next_call(&self, delay: Duration) {
            *self.next_call_delay.lock().unwrap() = Some(delay);
        }
    }

    impl Backend for MockBackend {
        fn call(&self, request: Request) -> Result<Response> {
            self.requests.lock().unwrap().push(request);
            if let Some(delay) = self.next_call_delay.lock().unwrap().take() {
                std::thread::sleep(delay);
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(MdErrorKind::Transport.into()))
        }
    }
}
