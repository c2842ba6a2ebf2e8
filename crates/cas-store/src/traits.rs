use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::BackendResult;

/// Location of a blob in a backend: a bucket plus a key inside it.
///
/// The client builds keys as `prefix/objectID`; backends treat the key as an
/// opaque `/`-separated string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey {
    pub bucket: String,
    pub key: String,
}

impl BlobKey {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Keyed blob service the store client talks to.
///
/// All implementations must satisfy these invariants:
/// - `exists` reports a missing object as `Ok(false)`, never as an error.
/// - `read` reports a missing object as [`BackendError::NotFound`](crate::BackendError::NotFound).
/// - `write` replaces the blob at `key`. Under content addressing the bytes
///   for a given key never change, so a repeated write is harmless.
/// - Calls may run concurrently from many tasks.
///
/// Retry and backoff for transient failures belong to the implementation,
/// not to the client.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Check whether a blob exists at `key`.
    async fn exists(&self, key: &BlobKey) -> BackendResult<bool>;

    /// Write `data` at `key`.
    async fn write(&self, key: &BlobKey, data: Bytes) -> BackendResult<()>;

    /// Read the full blob at `key`.
    async fn read(&self, key: &BlobKey) -> BackendResult<Bytes>;
}
