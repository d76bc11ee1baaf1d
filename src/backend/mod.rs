//! Synchronous request/response transport to the MD server (§4.7) and the
//! wire containers it exchanges (§6).

pub mod client;
pub mod protocol;

pub use client::{mock, Backend, PutOp, Request, Response, TcpBackend};
pub use protocol::{CapWire, Frame, HeartbeatWire, LockType, LockWire, MdMapWire, MdWire, QuotaWire, Statistics};
