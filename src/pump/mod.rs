//! The message-duplex loop (§4.8): one thread emits periodic heartbeats,
//! another demultiplexes inbound `EVICT`/`LEASE`/`MD`/`MDMAP` frames. Each
//! owns its own connection (§9 "Duplex transport thread"), so neither
//! direction can stall behind the other or behind a synchronous `Backend`
//! RPC.

pub mod inbound;
pub mod outbound;
pub mod transport;

pub use inbound::run as run_inbound;
pub use outbound::{run as run_outbound, HeartbeatIdentity};
pub use transport::{PumpInbound, PumpOutbound, TcpPumpInbound, TcpPumpOutbound};
