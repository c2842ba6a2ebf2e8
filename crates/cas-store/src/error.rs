use std::path::PathBuf;

use cas_types::ObjectId;

use crate::traits::BlobKey;

/// Errors reported by a [`BlobBackend`](crate::BlobBackend).
///
/// "Not found" on an existence check is not an error: backends report it as
/// `Ok(false)`. [`BackendError::NotFound`] is only returned by reads.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The requested object does not exist in the backend.
    #[error("object not found: {0}")]
    NotFound(BlobKey),

    /// The key cannot be mapped onto the backend's namespace.
    #[error("invalid key {key}: {reason}")]
    InvalidKey { key: BlobKey, reason: String },

    /// I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend rejected or failed the request.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors from object store client operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store address could not be parsed.
    #[error("parsing store address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The store address names a scheme this client cannot serve.
    #[error("object store {address:?}: unsupported scheme {scheme:?}")]
    UnsupportedScheme { address: String, scheme: String },

    /// Options or configuration values are out of range or malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration file could not be read.
    #[error("reading configuration {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure reported by the blob backend, passed through unchanged.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Retrieved content does not hash to the requested ID.
    #[error("object store mismatch: got csum={computed} expected {expected}")]
    ChecksumMismatch {
        expected: ObjectId,
        computed: ObjectId,
    },
}

impl StoreError {
    /// Returns `true` for errors raised while building a client, before any
    /// backend operation ran.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress { .. }
                | Self::UnsupportedScheme { .. }
                | Self::InvalidConfig(_)
                | Self::ConfigRead { .. }
        )
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
