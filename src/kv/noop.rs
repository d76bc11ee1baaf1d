use super::{Key, KvStore};
use crate::Result;

/// KVStore that discards everything. Used when persistence is disabled;
/// every `get` is a miss and every `put`/`erase` succeeds trivially.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopKvStore;

impl KvStore for NoopKvStore {
    fn put(&self, _key: &Key, _value: &[u8]) -> Result<()> {
        Ok(())
    }

    fn get(&self, _key: &Key) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn erase(&self, _key: &Key) -> Result<()> {
        Ok(())
    }
}
