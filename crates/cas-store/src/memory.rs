use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{BackendError, BackendResult};
use crate::traits::{BlobBackend, BlobKey};

/// Number of calls an [`InMemoryBackend`] has served, per operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub exists_calls: u64,
    pub write_calls: u64,
    pub read_calls: u64,
}

#[derive(Default)]
struct Counters {
    exists: AtomicU64,
    write: AtomicU64,
    read: AtomicU64,
}

/// In-memory, HashMap-based blob backend.
///
/// Intended for tests and embedding. Blobs are held behind a `RwLock` and
/// every trait call is counted, so callers can assert how many round trips an
/// operation cost. Keys can be marked as failing to simulate an unreachable
/// backend.
pub struct InMemoryBackend {
    objects: RwLock<HashMap<BlobKey, Bytes>>,
    failing: RwLock<HashSet<BlobKey>>,
    counters: Counters,
}

impl InMemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            counters: Counters::default(),
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no blobs are stored.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.objects
            .read()
            .expect("lock poisoned")
            .values()
            .map(|data| data.len() as u64)
            .sum()
    }

    /// Sorted list of all keys in the backend.
    pub fn keys(&self) -> Vec<BlobKey> {
        let map = self.objects.read().expect("lock poisoned");
        let mut keys: Vec<BlobKey> = map.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Store `data` at `key` directly, without counting a write.
    ///
    /// Used to seed content uploaded "by someone else", or to plant corrupt
    /// bytes under a key.
    pub fn insert(&self, key: BlobKey, data: impl Into<Bytes>) {
        self.objects
            .write()
            .expect("lock poisoned")
            .insert(key, data.into());
    }

    /// Fetch the blob at `key` directly, without counting a read.
    pub fn get(&self, key: &BlobKey) -> Option<Bytes> {
        self.objects.read().expect("lock poisoned").get(key).cloned()
    }

    /// Make every subsequent operation on `key` fail with
    /// [`BackendError::Unavailable`].
    pub fn fail_key(&self, key: BlobKey) {
        self.failing.write().expect("lock poisoned").insert(key);
    }

    /// Remove all blobs and failure markers.
    pub fn clear(&self) {
        self.objects.write().expect("lock poisoned").clear();
        self.failing.write().expect("lock poisoned").clear();
    }

    /// Call counts since creation or the last [`reset_stats`](Self::reset_stats).
    pub fn stats(&self) -> BackendStats {
        BackendStats {
            exists_calls: self.counters.exists.load(Ordering::Relaxed),
            write_calls: self.counters.write.load(Ordering::Relaxed),
            read_calls: self.counters.read.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.exists.store(0, Ordering::Relaxed);
        self.counters.write.store(0, Ordering::Relaxed);
        self.counters.read.store(0, Ordering::Relaxed);
    }

    fn check_failing(&self, key: &BlobKey) -> BackendResult<()> {
        if self.failing.read().expect("lock poisoned").contains(key) {
            return Err(BackendError::Unavailable(format!("injected failure for {key}")));
        }
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobBackend for InMemoryBackend {
    async fn exists(&self, key: &BlobKey) -> BackendResult<bool> {
        self.counters.exists.fetch_add(1, Ordering::Relaxed);
        self.check_failing(key)?;
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.contains_key(key))
    }

    async fn write(&self, key: &BlobKey, data: Bytes) -> BackendResult<()> {
        self.counters.write.fetch_add(1, Ordering::Relaxed);
        self.check_failing(key)?;
        let mut map = self.objects.write().expect("lock poisoned");
        map.insert(key.clone(), data);
        Ok(())
    }

    async fn read(&self, key: &BlobKey) -> BackendResult<Bytes> {
        self.counters.read.fetch_add(1, Ordering::Relaxed);
        self.check_failing(key)?;
        let map = self.objects.read().expect("lock poisoned");
        map.get(key)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(key.clone()))
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("object_count", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}
