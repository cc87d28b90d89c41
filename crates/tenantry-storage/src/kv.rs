use crate::{Result, StorageError};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Key-value store backing the provisioning catalog
pub trait KVStore: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Put a key-value pair
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Scan keys with a given prefix, in key order
    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>>;

    /// Check if a key exists
    fn exists(&self, key: &[u8]) -> Result<bool>;

    /// Begin a write transaction
    ///
    /// Write transactions are serialized by the backend, so a read-check-write
    /// sequence inside one transaction cannot interleave with another writer.
    fn transaction(&self) -> Result<Box<dyn Transaction>>;
}

/// Transaction trait for atomic operations
pub trait Transaction: Send {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Put a key-value pair
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Commit the transaction
    fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    fn rollback(self: Box<Self>) -> Result<()>;
}

fn decode<T: DeserializeOwned>(key: &str, data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| StorageError::corrupt_record(key, e))
}

/// JSON helpers over [`KVStore`]
pub trait KVStoreExt: KVStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key.as_bytes())?
            .map(|data| decode(key, &data))
            .transpose()
    }

    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        self.put(key.as_bytes(), &data)
    }

    fn scan_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, T)>> {
        self.scan(prefix.as_bytes())?
            .into_iter()
            .map(|(key, data)| {
                let key = String::from_utf8(key.to_vec())
                    .map_err(|_| StorageError::invalid_key(&key))?;
                let value = decode(&key, &data)?;
                Ok((key, value))
            })
            .collect()
    }
}

impl<S: KVStore + ?Sized> KVStoreExt for S {}

/// JSON helpers over [`Transaction`]
pub fn txn_get_json<T: DeserializeOwned>(txn: &dyn Transaction, key: &str) -> Result<Option<T>> {
    txn.get(key.as_bytes())?
        .map(|data| decode(key, &data))
        .transpose()
}

pub fn txn_put_json<T: Serialize>(txn: &mut dyn Transaction, key: &str, value: &T) -> Result<()> {
    let data = serde_json::to_vec(value)?;
    txn.put(key.as_bytes(), &data)
}
