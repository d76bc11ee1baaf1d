//! The bounded, coalescing write-behind queue of MD mutations, and the
//! single worker thread that drains it against the Backend and the
//! KVStore (§4.6).

pub mod queue;
pub mod worker;

pub use queue::{FlushEntry, FlushQueue};
