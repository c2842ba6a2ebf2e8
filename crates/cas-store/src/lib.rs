//! Content-addressed object store client.
//!
//! Stores opaque blobs in a remote blob backend under the digest of their
//! content, and retrieves them in bulk with integrity verification. Two
//! properties fall out of content addressing:
//!
//! - **Deduplication**: identical content is uploaded at most once per
//!   process, and not at all if the backend already holds it.
//! - **Integrity**: every retrieved blob is re-hashed and rejected if it
//!   does not match the ID it was requested under.
//!
//! # Components
//!
//! - [`ObjectStoreClient`] -- `store`, `get_object`, and the batch
//!   [`get_objects`](ObjectStoreClient::get_objects) pipeline
//! - [`DedupCache`] / [`UploadHandle`] -- process-local "known present" set
//!   with resolve-once upload handles
//! - [`BlobBackend`] -- the keyed blob service the client talks to
//! - [`StoreAddress`] / [`StoreConfig`] -- `s3://bucket/prefix` addresses and
//!   TOML or environment configuration
//!
//! # Backends
//!
//! - [`InMemoryBackend`] -- `HashMap`-based backend for tests and embedding
//! - [`DirectoryBackend`] -- local filesystem, one file per blob
//!
//! # Design Rules
//!
//! 1. The cache learns an ID only when the backend is known to hold it.
//! 2. Every upload handle resolves exactly once; dropping it rolls back.
//! 3. A batch item's failure stays in that item's slot.
//! 4. Broken internal invariants abort the process instead of returning.

pub mod address;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod fatal;
pub mod fetch;
pub mod fs;
pub mod memory;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use address::StoreAddress;
pub use cache::{DedupCache, InMemoryDedupCache, UploadHandle, UploadState};
pub use client::ObjectStoreClient;
pub use config::{StoreConfig, StoreOptions, DEFAULT_GET_CONCURRENCY};
pub use error::{BackendError, BackendResult, StoreError, StoreResult};
pub use fetch::GetRequest;
pub use fs::DirectoryBackend;
pub use memory::{BackendStats, InMemoryBackend};
pub use traits::{BlobBackend, BlobKey};
pub use tokio_util::sync::CancellationToken;
