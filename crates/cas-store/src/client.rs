use std::sync::Arc;

use bytes::Bytes;
use cas_crypto::digest;
use cas_types::ObjectId;
use tracing::{debug, field, warn, Span};

use crate::address::StoreAddress;
use crate::cache::{DedupCache, InMemoryDedupCache};
use crate::config::{StoreConfig, StoreOptions};
use crate::error::{StoreError, StoreResult};
use crate::traits::BlobBackend;

/// Content-addressed client over a [`BlobBackend`].
///
/// Cloning is cheap; clones share the backend and the dedup cache.
#[derive(Clone)]
pub struct ObjectStoreClient {
    pub(crate) inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) address: StoreAddress,
    pub(crate) options: StoreOptions,
    pub(crate) backend: Arc<dyn BlobBackend>,
    pub(crate) cache: Arc<dyn DedupCache>,
}

impl ObjectStoreClient {
    /// Build a client with default options.
    ///
    /// Fails with a configuration error if `address` is not a valid
    /// `s3://bucket/prefix` address.
    pub fn new(backend: Arc<dyn BlobBackend>, address: &str) -> StoreResult<Self> {
        Self::with_options(backend, address, StoreOptions::default())
    }

    pub fn with_options(
        backend: Arc<dyn BlobBackend>,
        address: &str,
        options: StoreOptions,
    ) -> StoreResult<Self> {
        Self::with_cache(
            backend,
            address,
            options,
            Arc::new(InMemoryDedupCache::new()),
        )
    }

    /// Build a client that shares `cache` with other clients.
    pub fn with_cache(
        backend: Arc<dyn BlobBackend>,
        address: &str,
        options: StoreOptions,
        cache: Arc<dyn DedupCache>,
    ) -> StoreResult<Self> {
        let address = StoreAddress::parse(address)?;
        options.validate()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                address,
                options,
                backend,
                cache,
            }),
        })
    }

    pub fn from_config(backend: Arc<dyn BlobBackend>, config: &StoreConfig) -> StoreResult<Self> {
        Self::with_options(backend, &config.address, config.options.clone())
    }

    pub fn address(&self) -> &StoreAddress {
        &self.inner.address
    }

    pub fn options(&self) -> &StoreOptions {
        &self.inner.options
    }

    pub fn cache(&self) -> &Arc<dyn DedupCache> {
        &self.inner.cache
    }

    /// Upload `content` if the backend does not already hold it, and return
    /// its object ID.
    ///
    /// Content seen complete earlier in this process returns without any
    /// backend call. Otherwise at most one existence check and at most one
    /// write are issued. The dedup cache learns the ID only when the content
    /// is confirmed present.
    #[tracing::instrument(
        name = "cas.store",
        skip_all,
        fields(object_id = field::Empty, exists = field::Empty, write_bytes = field::Empty)
    )]
    pub async fn store(&self, content: impl Into<Bytes>) -> StoreResult<ObjectId> {
        let content = content.into();
        let id = digest(&content);
        let span = Span::current();
        span.record("object_id", field::display(&id));

        if self.inner.cache.has_object(&id) {
            debug!("object already known present");
            return Ok(id);
        }

        let key = self.inner.address.key_for(&id);
        let mut upload = self.inner.cache.start_upload(id);

        if !self.inner.options.disable_head_check && self.inner.backend.exists(&key).await? {
            upload.complete();
            span.record("exists", true);
            return Ok(id);
        }

        span.record("write_bytes", content.len());
        self.inner.backend.write(&key, content).await?;
        upload.complete();
        Ok(id)
    }

    /// Fetch one object and verify it hashes to `id`.
    ///
    /// A verified read marks `id` present in the dedup cache, since the
    /// backend evidently holds it. A mismatch leaves the cache untouched.
    #[tracing::instrument(
        name = "cas.get_one",
        skip_all,
        fields(object_id = %id, read_bytes = field::Empty)
    )]
    pub async fn get_object(&self, id: &ObjectId) -> StoreResult<Bytes> {
        let key = self.inner.address.key_for(id);
        let body = self.inner.backend.read(&key).await?;

        let computed = digest(&body);
        if computed != *id {
            warn!(%computed, "retrieved object does not match its ID");
            return Err(StoreError::ChecksumMismatch {
                expected: *id,
                computed,
            });
        }
        self.inner.cache.start_upload(*id).complete();

        Span::current().record("read_bytes", body.len());
        Ok(body)
    }
}

impl std::fmt::Debug for ObjectStoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreClient")
            .field("address", &self.inner.address)
            .field("options", &self.inner.options)
            .finish()
    }
}
