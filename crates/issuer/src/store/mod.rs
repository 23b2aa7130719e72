//! Persistence for domain records and binary artifacts
//!
//! # Architecture
//!
//! - [`DomainStore`] - Keyed storage of [`DomainRecord`]s by (user id, domain)
//! - [`BlobStore`] - Path-addressed byte storage for keys, certificates and account credentials
//!
//! Both come with an in-memory implementation and a filesystem-backed one
//! ([`JsonFileDomainStore`], [`FsBlobStore`]).

mod blob;
mod json_file;
mod memory;

use async_trait::async_trait;
use std::fmt::Debug;
use std::io;
use thiserror::Error;

use dnsproof_common::{DomainRecord, RecordKey};

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use json_file::JsonFileDomainStore;
pub use memory::MemoryDomainStore;

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors specific to record and blob storage
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error during file operations
    #[error("IO error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Failed to serialize/deserialize data
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Blob path escapes the store root
    #[error("Invalid blob path: {0}")]
    InvalidPath(String),

    /// Backend refused the operation
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Keyed storage of domain records.
///
/// Records are only ever addressed by their [`RecordKey`]. `put` replaces
/// whatever is stored under the record's key.
#[async_trait]
pub trait DomainStore: Send + Sync + Debug {
    async fn get(&self, key: &RecordKey) -> StoreResult<Option<DomainRecord>>;

    async fn put(&self, record: &DomainRecord) -> StoreResult<()>;

    /// Returns whether a record was removed
    async fn delete(&self, key: &RecordKey) -> StoreResult<bool>;

    /// Every record, ordered by user id then domain
    async fn list_all(&self) -> StoreResult<Vec<DomainRecord>>;
}
