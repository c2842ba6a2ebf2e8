//! Process-local upload dedup cache.
//!
//! The cache answers "is this object known to be present in the backend?"
//! and hands out [`UploadHandle`]s that record the answer once an upload (or
//! a verified download) proves it. Nothing here persists past the process.

use std::collections::HashSet;
use std::sync::RwLock;

use cas_types::ObjectId;

/// Set of object IDs known to exist in the backend.
///
/// Implementations must be safe for concurrent use from many tasks. The
/// client imposes no locking discipline beyond "each handle resolves once".
///
/// `start_upload` never blocks and never deduplicates concurrent callers:
/// two tasks storing the same content at the same time may both check and
/// both write. That redundancy is accepted.
pub trait DedupCache: Send + Sync {
    /// `true` only if some handle for `id` previously reached
    /// [`UploadState::Complete`].
    fn has_object(&self, id: &ObjectId) -> bool;

    /// Begin an upload attempt for `id`. Always returns a fresh handle.
    fn start_upload(&self, id: ObjectId) -> UploadHandle<'_>;

    /// Record `id` as present. Invoked by [`UploadHandle::complete`]; callers
    /// should go through a handle instead.
    fn record_complete(&self, id: &ObjectId);

    /// Invoked by [`UploadHandle::rollback`] when an attempt is abandoned.
    fn record_rollback(&self, _id: &ObjectId) {}
}

/// Lifecycle of an [`UploadHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadState {
    Pending,
    /// Content confirmed present in the backend.
    Complete,
    /// Attempt abandoned; content not confirmed present.
    RolledBack,
}

/// Scoped upload attempt for one object ID.
///
/// The first call to [`complete`](Self::complete) or
/// [`rollback`](Self::rollback) resolves the handle; every later call is a
/// no-op. Dropping a pending handle rolls it back, so the success path calls
/// `complete` and every other exit (`?`, early return, panic, cancelled
/// future) resolves through `Drop`.
#[must_use = "dropping an upload handle immediately rolls it back"]
pub struct UploadHandle<'a> {
    cache: &'a dyn DedupCache,
    id: ObjectId,
    state: UploadState,
}

impl<'a> UploadHandle<'a> {
    /// Create a pending handle reporting to `cache`.
    pub fn new(cache: &'a dyn DedupCache, id: ObjectId) -> Self {
        Self {
            cache,
            id,
            state: UploadState::Pending,
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Mark the content as present in the backend.
    pub fn complete(&mut self) {
        if self.state != UploadState::Pending {
            return;
        }
        self.state = UploadState::Complete;
        self.cache.record_complete(&self.id);
    }

    /// Abandon the attempt.
    pub fn rollback(&mut self) {
        if self.state != UploadState::Pending {
            return;
        }
        self.state = UploadState::RolledBack;
        self.cache.record_rollback(&self.id);
    }
}

impl Drop for UploadHandle<'_> {
    fn drop(&mut self) {
        self.rollback();
    }
}

impl std::fmt::Debug for UploadHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadHandle")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

/// `HashSet`-backed [`DedupCache`] behind a `RwLock`.
pub struct InMemoryDedupCache {
    seen: RwLock<HashSet<ObjectId>>,
}

impl InMemoryDedupCache {
    pub fn new() -> Self {
        Self {
            seen: RwLock::new(HashSet::new()),
        }
    }

    /// Number of IDs known to be present.
    pub fn len(&self) -> usize {
        self.seen.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.read().expect("lock poisoned").is_empty()
    }

    /// Forget everything, e.g. after the backend was wiped.
    pub fn clear(&self) {
        self.seen.write().expect("lock poisoned").clear();
    }
}

impl Default for InMemoryDedupCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupCache for InMemoryDedupCache {
    fn has_object(&self, id: &ObjectId) -> bool {
        self.seen.read().expect("lock poisoned").contains(id)
    }

    fn start_upload(&self, id: ObjectId) -> UploadHandle<'_> {
        UploadHandle::new(self, id)
    }

    fn record_complete(&self, id: &ObjectId) {
        self.seen.write().expect("lock poisoned").insert(*id);
    }
}

impl std::fmt::Debug for InMemoryDedupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDedupCache")
            .field("known_objects", &self.len())
            .finish()
    }
}
