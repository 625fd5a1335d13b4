use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::{StoreError, StoreResult};

/// Storage for large result payloads referenced by key
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn save(&self, key: &str, bytes: Vec<u8>) -> StoreResult<bool>;

    async fn load(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;
}

#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.contains_key(key)
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn save(&self, key: &str, bytes: Vec<u8>) -> StoreResult<bool> {
        self.blobs.insert(key.to_string(), bytes);
        Ok(true)
    }

    async fn load(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.blobs.get(key).map(|b| b.value().clone()))
    }
}

/// Blob store rooted at a directory; keys map to relative paths
#[derive(Debug, Clone)]
pub struct FileSystemBlobStore {
    root: PathBuf,
}

impl FileSystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::Backend(format!("Invalid blob key: {key}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FileSystemBlobStore {
    async fn save(&self, key: &str, bytes: Vec<u8>) -> StoreResult<bool> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        debug!(path = %path.display(), size = bytes.len(), "Saved blob");
        Ok(true)
    }

    async fn load(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
