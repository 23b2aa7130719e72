//! Path-addressed byte storage
//!
//! Paths are relative, `/`-separated keys such as
//! `mastodon_le_certs/foo.example/cert.key`. The filesystem implementation
//! maps them under a root directory and refuses keys that would escape it.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};

use super::{StoreError, StoreResult};

/// Byte storage addressed by relative paths.
#[async_trait]
pub trait BlobStore: Send + Sync + Debug {
    /// Create or replace the blob at `path`
    async fn write_bytes(&self, path: &str, data: &[u8]) -> StoreResult<()>;

    /// Read the blob at `path`, `None` if it does not exist
    async fn read_bytes(&self, path: &str) -> StoreResult<Option<Vec<u8>>>;
}

/// Blobs as files under a root directory.
///
/// Files are created owner-readable only on unix; they hold private keys
/// and account credentials.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn write_bytes(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        let full = self.resolve(path)?;

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent.display().to_string(), e))?;
        }

        tokio::fs::write(&full, data)
            .await
            .map_err(|e| StoreError::io(full.display().to_string(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&full, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| StoreError::io(full.display().to_string(), e))?;
        }

        debug!(path = %full.display(), bytes = data.len(), "Wrote blob");
        Ok(())
    }

    async fn read_bytes(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(path = %full.display(), "Blob not found");
                Ok(None)
            }
            Err(e) => Err(StoreError::io(full.display().to_string(), e)),
        }
    }
}

/// Blobs held in memory.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths of every stored blob, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.blobs.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn write_bytes(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        self.blobs.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn read_bytes(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.blobs.get(path).map(|e| e.value().clone()))
    }
}
