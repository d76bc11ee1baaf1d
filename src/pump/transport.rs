//! The message pump's own connections to the MD server (§1 Transport
//! substitution, §9 "Duplex transport thread"). These are independent of the
//! `Backend`'s request/response connection: the outbound heartbeat thread
//! and the inbound demultiplex thread each own a dedicated `TcpStream`, so a
//! blocked synchronous RPC on the `Backend` side never stalls a heartbeat or
//! delays delivery of a broadcast frame.

use crate::backend::protocol::write_message;
use crate::backend::{Frame, HeartbeatWire};
use crate::error::MdErrorKind;
use crate::Result;
use std::io::{BufWriter, ErrorKind, Read};
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration;

/// the outbound heartbeat connection (§4.8).
pub trait PumpOutbound: Send + Sync {
    /// send one heartbeat frame.
    fn send_heartbeat(&self, hb: &HeartbeatWire) -> Result<()>;
    /// tear down and re-establish the connection.
    fn reconnect(&self) -> Result<()>;
}

/// the inbound broadcast connection (§4.8).
pub trait PumpInbound: Send + Sync {
    /// wait up to `timeout` for the next frame; `Ok(None)` on a clean
    /// timeout, distinct from a transport failure.
    fn try_recv(&self, timeout: Duration) -> Result<Option<Frame>>;
    /// tear down and re-establish the connection.
    fn reconnect(&self) -> Result<()>;
}

fn dial(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).map_err(|_| MdErrorKind::Transport)?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// `PumpOutbound` over its own `TcpStream`.
pub struct TcpPumpOutbound {
    addr: String,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpPumpOutbound {
    /// dial `addr` for the heartbeat connection.
    pub fn connect(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        let stream = dial(&addr)?;
        Ok(TcpPumpOutbound {
            addr,
            stream: Mutex::new(Some(stream)),
        })
    }
}

impl PumpOutbound for TcpPumpOutbound {
    fn send_heartbeat(&self, hb: &HeartbeatWire) -> Result<()> {
        let mut guard = self.stream.lock().unwrap();
        let stream = guard.as_ref().ok_or(MdErrorKind::Transport)?;
        let mut writer = BufWriter::new(stream);
        match write_message(&mut writer, &Frame::Heartbeat(hb.clone())) {
            Ok(()) => Ok(()),
            Err(e) => {
                *guard = None;
                Err(e)
            }
        }
    }

    fn reconnect(&self) -> Result<()> {
        let stream = dial(&self.addr)?;
        *self.stream.lock().unwrap() = Some(stream);
        Ok(())
    }
}

/// `PumpInbound` over its own `TcpStream`. `try_recv` distinguishes a read
/// timeout (no frame arrived within the poll tick) from an actual transport
/// failure, which `read_message` alone cannot do.
pub struct TcpPumpInbound {
    addr: String,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpPumpInbound {
    /// dial `addr` for the broadcast connection.
    pub fn connect(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        let stream = dial(&addr)?;
        Ok(TcpPumpInbound {
            addr,
            stream: Mutex::new(Some(stream)),
        })
    }
}

impl PumpInbound for TcpPumpInbound {
    fn try_recv(&self, timeout: Duration) -> Result<Option<Frame>> {
        let mut guard = self.stream.lock().unwrap();
        let stream = guard.as_mut().ok_or(MdErrorKind::Transport)?;
        stream.set_read_timeout(Some(timeout)).ok();

        let mut len_buf = [0u8; 8];
        if let Err(e) = stream.read_exact(&mut len_buf) {
            return match e.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut => Ok(None),
                _ => {
                    *guard = None;
                    Err(MdErrorKind::Transport.into())
                }
            };
        }
        let len = u64::from_be_bytes(len_buf);

        let mut body = vec![0u8; len as usize];
        if stream.read_exact(&mut body).is_err() {
            *guard = None;
            return Err(MdErrorKind::Transport.into());
        }

        let frame: Frame = serde_json::from_slice(&body)?;
        Ok(Some(frame))
    }

    fn reconnect(&self) -> Result<()> {
        let stream = dial(&self.addr)?;
        *self.stream.lock().unwrap() = Some(stream);
        Ok(())
    }
}

pub mod mock {
    //! In-process stand-ins for both pump connections, used by this crate's
    //! own tests (a real MD server is an explicit Non-goal, §1).
    use super::*;
    use std::collections::VecDeque;

    /// a `PumpOutbound` that records every heartbeat sent, and can be told
    /// to fail the next `send_heartbeat` to exercise reconnect.
    pub struct MockPumpOutbound {
        pub sent: Mutex<Vec<HeartbeatWire>>,
        pub fail_next: Mutex<bool>,
        pub reconnects: Mutex<u64>,
    }

    impl MockPumpOutbound {
        pub fn new() -> Self {
            MockPumpOutbound {
                sent: Mutex::new(Vec::new()),
                fail_next: Mutex::new(false),
                reconnects: Mutex::new(0),
            }
        }

        pub fn fail_next_send(&self) {
            *self.fail_next.lock().unwrap() = true;
        }
    }

    impl PumpOutbound for MockPumpOutbound {
        fn send_heartbeat(&self, hb: &HeartbeatWire) -> Result<()> {
            let mut fail = self.fail_next.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(MdErrorKind::Transport.into());
            }
            self.sent.lock().unwrap().push(hb.clone());
            Ok(())
        }

        fn reconnect(&self) -> Result<()> {
            *self.reconnects.lock().unwrap() += 1;
            Ok(())
        }
    }

    /// a `PumpInbound` that plays back a scripted queue of frames.
    pub struct MockPumpInbound {
        queue: Mutex<VecDeque<Frame>>,
    }

    impl MockPumpInbound {
        pub fn new() -> Self {
            MockPumpInbound {
                queue: Mutex::new(VecDeque::new()),
            }
        }

        pub fn push(&self, frame: Frame) {
            self.queue.lock().unwrap().push_back(frame);
        }
    }

    impl PumpInbound for MockPumpInbound {
        fn try_recv(&self, _timeout: Duration) -> Result<Option<Frame>> {
            Ok(self.queue.lock().unwrap().pop_front())
        }

        fn reconnect(&self) -> Result<()> {
            Ok(())
        }
    }
}
