//! The capability store: cap records, the revocation set, per-`(uid, gid,
//! quota-node)` quota accounting, and the expiry sweeper (§4.3, §4.4).

pub mod quota;
pub mod record;
pub mod store;
pub mod sweeper;

pub use quota::{QuotaHandle, QuotaRecord, QuotaStore};
pub use record::{Cap, CapIdentity, R_OK, W_OK, X_OK};
pub use store::CapStore;
