use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{BackendError, BackendResult};
use crate::traits::{BlobBackend, BlobKey};

/// Blob backend on the local filesystem.
///
/// A blob at `bucket` / `a/b/c` lives at `<root>/bucket/a/b/c`. Writes go to
/// a temporary file in the target directory and are renamed into place, so a
/// reader never observes a partially written blob.
#[derive(Clone, Debug)]
pub struct DirectoryBackend {
    root: PathBuf,
}

impl DirectoryBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for `key`, refusing anything that could escape the root.
    pub fn path_for(&self, key: &BlobKey) -> BackendResult<PathBuf> {
        let mut path = self.root.clone();
        push_segment(&mut path, key, &key.bucket)?;
        for segment in key.key.split('/') {
            push_segment(&mut path, key, segment)?;
        }
        Ok(path)
    }
}

fn push_segment(path: &mut PathBuf, key: &BlobKey, segment: &str) -> BackendResult<()> {
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(invalid(key, format!("illegal path segment {segment:?}")));
    }
    if segment.contains('\\') || segment.contains('\0') {
        return Err(invalid(key, format!("illegal character in {segment:?}")));
    }
    path.push(segment);
    Ok(())
}

fn invalid(key: &BlobKey, reason: impl Into<String>) -> BackendError {
    BackendError::InvalidKey {
        key: key.clone(),
        reason: reason.into(),
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "blob path has no parent"))?;
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl BlobBackend for DirectoryBackend {
    async fn exists(&self, key: &BlobKey) -> BackendResult<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn write(&self, key: &BlobKey, data: Bytes) -> BackendResult<()> {
        let path = self.path_for(key)?;
        debug!(path = %path.display(), bytes = data.len(), "writing blob");
        tokio::task::spawn_blocking(move || write_atomic(&path, &data))
            .await
            .map_err(|e| BackendError::Unavailable(format!("write task failed: {e}")))??;
        Ok(())
    }

    async fn read(&self, key: &BlobKey) -> BackendResult<Bytes> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(BackendError::NotFound(key.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
