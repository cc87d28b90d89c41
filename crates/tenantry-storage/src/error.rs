// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the provisioning catalog store
#[derive(Error, Debug, Diagnostic)]
pub enum StorageError {
    /// The catalog database could not be opened or read
    #[error("Catalog database error: {message}")]
    #[diagnostic(
        code(storage::database),
        help("Check that the catalog file is readable and not held open by another process")
    )]
    Database {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A write transaction could not begin, commit or abort
    #[error("Catalog transaction failed: {message}")]
    #[diagnostic(
        code(storage::transaction),
        help("The write was not applied; retry the operation")
    )]
    Transaction {
        message: String,
    },

    /// A stored row does not decode into the expected record
    #[error("Corrupt catalog record at {key}")]
    #[diagnostic(
        code(storage::corrupt_record),
        help("The row was written by an incompatible version or edited by hand; inspect or remove it")
    )]
    CorruptRecord {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be encoded for writing
    #[error("Failed to encode catalog record: {0}")]
    #[diagnostic(code(storage::encode))]
    Encode(#[from] serde_json::Error),

    /// A stored key is not UTF-8
    #[error("Catalog key is not valid UTF-8: {key}")]
    #[diagnostic(
        code(storage::invalid_key),
        help("Only the placement catalog should write to this table")
    )]
    InvalidKey {
        key: String,
    },
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    pub fn database_error(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::Database {
            message: message.into(),
            source,
        }
    }

    pub fn transaction_error(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn corrupt_record(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::CorruptRecord {
            key: key.into(),
            source,
        }
    }

    /// Raw key bytes, rendered lossily for the message
    pub fn invalid_key(key: &[u8]) -> Self {
        Self::InvalidKey {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }
}

macro_rules! from_redb {
    ($err:ty => database) => {
        impl From<$err> for StorageError {
            fn from(err: $err) -> Self {
                StorageError::database_error(err.to_string(), Some(Box::new(err)))
            }
        }
    };
    ($err:ty => transaction) => {
        impl From<$err> for StorageError {
            fn from(err: $err) -> Self {
                StorageError::transaction_error(err.to_string())
            }
        }
    };
}

from_redb!(redb::DatabaseError => database);
from_redb!(redb::StorageError => database);
from_redb!(redb::TableError => database);
from_redb!(redb::TransactionError => transaction);
from_redb!(redb::CommitError => transaction);
