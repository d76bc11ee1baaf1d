use super::{Key, KvStore};
use crate::Result;
use std::path::Path;

/// Durable KVStore backed by `sled`, the corpus's embedded-store of choice.
#[derive(Clone)]
pub struct SledKvStore {
    db: sled::Db,
}

impl SledKvStore {
    /// open (or create) a sled database rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::Config::new().path(path).open()?;
        Ok(Self { db })
    }

    /// wrap an already-open sled database.
    pub fn new(db: sled::Db) -> Self {
        Self { db }
    }
}

impl KvStore for SledKvStore {
    fn put(&self, key: &Key, value: &[u8]) -> Result<()> {
        self.db.insert(key.to_bytes(), value)?;
        self.db.flush()?;
        Ok(())
    }

    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key.to_bytes())?.map(|ivec| ivec.to_vec()))
    }

    fn erase(&self, key: &Key) -> Result<()> {
        self.db.remove(key.to_bytes())?;
        Ok(())
    }
}
