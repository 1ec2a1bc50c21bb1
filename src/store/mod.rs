//! Storage collaborators: binary blobs and project metadata snapshots.
//!
//! The pipeline never touches a disk or database directly; it goes through
//! two traits so deployments can swap the backing service:
//!
//! * [`BlobStore`]: opaque bytes addressed by an [`AssetRef`].
//! * [`MetadataStore`]: the latest [`Project`](crate::pipeline::Project)
//!   snapshot per project id.
//!
//! In-memory implementations back the tests; [`FsBlobStore`] keeps assets
//! under the configured asset directory.

pub mod blob;
pub mod metadata;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use metadata::{MemoryMetadataStore, MetadataStore};

// ---------------------------------------------------------------------------
// AssetRef
// ---------------------------------------------------------------------------

/// Opaque handle returned by [`BlobStore::put`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(pub String);

impl AssetRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("asset '{0}' not found")]
    NotFound(AssetRef),

    #[error("invalid asset reference '{0}'")]
    InvalidRef(String),

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata store failed: {0}")]
    Backend(String),
}

/// File extension for a stored content type.
pub(crate) fn extension_for(content_type: &str) -> &'static str {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    match essence.to_ascii_lowercase().as_str() {
        "audio/wav" | "audio/x-wav" | "audio/wave" | "audio/vnd.wave" => "wav",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/flac" | "audio/x-flac" => "flac",
        "application/json" => "json",
        "text/plain" => "txt",
        _ => "bin",
    }
}
