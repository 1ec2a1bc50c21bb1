//! Blob storage: in-memory and filesystem backends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{extension_for, AssetRef, StoreError};

// ---------------------------------------------------------------------------
// BlobStore trait
// ---------------------------------------------------------------------------

/// Content-addressed-by-handle byte storage.
///
/// Implementors must be `Send + Sync` so one store can be shared by every
/// job (`Arc<dyn BlobStore>`).
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<AssetRef, StoreError>;

    async fn get(&self, asset: &AssetRef) -> Result<Vec<u8>, StoreError>;

    async fn delete(&self, asset: &AssetRef) -> Result<(), StoreError>;

    /// `Ok(false)` when the asset is gone; other failures propagate.
    async fn exists(&self, asset: &AssetRef) -> Result<bool, StoreError> {
        match self.get(asset).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<AssetRef, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<AssetRef, StoreError> {
        let asset = AssetRef(format!("{}.{}", Uuid::new_v4(), extension_for(content_type)));
        self.blobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(asset.clone(), bytes);
        Ok(asset)
    }

    async fn get(&self, asset: &AssetRef) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(asset)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(asset.clone()))
    }

    async fn delete(&self, asset: &AssetRef) -> Result<(), StoreError> {
        self.blobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(asset)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(asset.clone()))
    }
}

// ---------------------------------------------------------------------------
// FsBlobStore
// ---------------------------------------------------------------------------

/// One file per asset, named `<uuid>.<ext>` inside `root`.
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

    fn path_for(&self, asset: &AssetRef) -> Result<PathBuf, StoreError> {
        let name = asset.as_str();
        if name.is_empty()
            || name.contains(|c: char| c == '/' || c == '\\')
            || name.starts_with('.')
            || name.contains("..")
        {
            return Err(StoreError::InvalidRef(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<AssetRef, StoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let asset = AssetRef(format!("{}.{}", Uuid::new_v4(), extension_for(content_type)));
        let path = self.path_for(&asset)?;
        tokio::fs::write(&path, bytes).await?;
        log::debug!("store: wrote {}", path.display());
        Ok(asset)
    }

    async fn get(&self, asset: &AssetRef) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(asset)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(asset.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, asset: &AssetRef) -> Result<(), StoreError> {
        let path = self.path_for(asset)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(asset.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
