//! sled database wrapper with serialization helpers.

use crate::error::Result;
use hodl_core::{Address, Hash};
use sled::Db;
use std::path::Path;

/// Wrapper around sled database with serialization helpers.
#[derive(Clone)]
pub struct Database {
    db: Db,
}

impl Database {
    /// Open a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open an in-memory database (for testing).
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Retrieve raw bytes.
    pub fn get_raw<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<sled::IVec>> {
        Ok(self.db.get(key)?)
    }

    /// Retrieve and deserialize a value.
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: serde::de::DeserializeOwned,
    {
        match self.db.get(key)? {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Check if a key exists.
    pub fn contains<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        Ok(self.db.contains_key(key)?)
    }

    /// Deserialize every value under `prefix`, paired with the key suffix.
    pub fn scan<V>(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, V)>>
    where
        V: serde::de::DeserializeOwned,
    {
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(prefix) {
            let (key, bytes) = entry?;
            out.push((key[prefix.len()..].to_vec(), bincode::deserialize(&bytes)?));
        }
        Ok(out)
    }

    /// Count keys under `prefix`.
    pub fn count(&self, prefix: &[u8]) -> Result<u64> {
        let mut n = 0;
        for entry in self.db.scan_prefix(prefix).keys() {
            entry?;
            n += 1;
        }
        Ok(n)
    }

    /// Apply a batch atomically.
    ///
    /// Atomicity is provided by sled's `apply_batch`: readers see either
    /// none or all of the batch.
    pub fn apply(&self, batch: WriteBatch) -> Result<()> {
        self.db.apply_batch(batch.inner)?;
        Ok(())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // =========================================================================
    // Key Construction Helpers
    // =========================================================================

    /// Format: "account:" + address_bytes
    pub fn account_key(address: &Address) -> Vec<u8> {
        let mut key = ACCOUNT_PREFIX.to_vec();
        key.extend_from_slice(&address.0);
        key
    }

    /// Format: "contract:" + address_bytes
    pub fn contract_key(address: &Address) -> Vec<u8> {
        let mut key = CONTRACT_PREFIX.to_vec();
        key.extend_from_slice(&address.0);
        key
    }

    /// Format: "block:height:{height}", holding the canonical block's hash
    pub fn block_height_key(height: u64) -> Vec<u8> {
        format!("block:height:{}", height).into_bytes()
    }

    /// Format: "block:weight:" + hash_bytes
    pub fn block_weight_key(hash: &Hash) -> Vec<u8> {
        hash_key(b"block:weight:", hash)
    }

    /// Format: "block:hash:" + hash_bytes, holding the block itself
    pub fn block_hash_key(hash: &Hash) -> Vec<u8> {
        hash_key(b"block:hash:", hash)
    }

    /// Format: "undo:" + hash_bytes
    pub fn undo_key(hash: &Hash) -> Vec<u8> {
        hash_key(b"undo:", hash)
    }
}

fn hash_key(prefix: &[u8], hash: &Hash) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(&hash.0);
    key
}

pub const ACCOUNT_PREFIX: &[u8] = b"account:";
pub const CONTRACT_PREFIX: &[u8] = b"contract:";

/// Serialized writes collected for one atomic batch.
#[derive(Default)]
pub struct WriteBatch {
    inner: sled::Batch,
    len: usize,
}

impl WriteBatch {
    pub fn put<K, V>(&mut self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: serde::Serialize,
    {
        let encoded = bincode::serialize(value)?;
        self.inner.insert(key.as_ref(), encoded);
        self.len += 1;
        Ok(())
    }

    pub fn remove<K: AsRef<[u8]>>(&mut self, key: K) {
        self.inner.remove(key.as_ref());
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
