//! Tenantry Storage - Provisioning catalog storage on redb
//!
//! This crate provides:
//! - KVStore trait for storage abstraction, with JSON helpers
//! - redb-based implementation (file-backed or in-memory)
//! - Catalog key encoding
//! - Serialized write transactions

pub mod encoding;
pub mod error;
pub mod kv;
pub mod redb_backend;

// Re-export commonly used types
pub use encoding::{CatalogKey, KeyEncoder};
pub use error::{Result, StorageError};
pub use kv::{txn_get_json, txn_put_json, KVStore, KVStoreExt, Transaction};
pub use redb_backend::RedbBackend;
