//! Export bundling: transformed audio + lyrics → manifest.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::{Project, ProjectId};
use crate::audio::AudioAsset;
use crate::lyrics::StyleSpec;
use crate::separation::InstrumentClass;
use crate::store::{AssetRef, BlobStore, StoreError};
use crate::transform::StylePreset;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("project {project} has no {what}")]
    Missing {
        project: ProjectId,
        what: &'static str,
    },

    #[error("asset {0} referenced by the project is missing from storage")]
    AssetMissing(AssetRef),

    #[error("storage error while checking assets: {0}")]
    Storage(#[from] StoreError),

    #[error("failed to serialise manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Deliverable description of a finished project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub project_id: ProjectId,
    pub name: String,
    pub style: StylePreset,
    pub audio: AudioAsset,
    pub lyrics: String,
    pub lyrics_style: StyleSpec,
    pub lyrics_style_label: String,
    /// Separated source stems, when the cached set is still referenced.
    pub stems: BTreeMap<InstrumentClass, AssetRef>,
    pub generated_at: DateTime<Utc>,
}

impl ExportManifest {
    /// Plain-text lyrics sheet shipped next to the audio.
    pub fn lyrics_document(&self) -> String {
        format!(
            "Lyrics for {}\nStyle: {}\n====\n\n{}\n",
            self.name,
            self.lyrics_style_label,
            self.lyrics.trim()
        )
    }

    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Result of a readiness query: `manifest` is present iff `ready`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportReadiness {
    pub ready: bool,
    pub manifest: Option<ExportManifest>,
}

impl ExportReadiness {
    pub fn not_ready() -> Self {
        Self {
            ready: false,
            manifest: None,
        }
    }
}

pub struct ExportBundler {
    blobs: Arc<dyn BlobStore>,
}

impl ExportBundler {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Build the manifest for `project`. Every referenced asset must still
    /// be present in the blob store.
    pub async fn bundle(&self, project: &Project) -> Result<ExportManifest, ExportError> {
        let audio = project.transformed.clone().ok_or(ExportError::Missing {
            project: project.id,
            what: "transformed audio",
        })?;
        let lyrics = project
            .lyrics
            .clone()
            .filter(|l| !l.text.trim().is_empty())
            .ok_or(ExportError::Missing {
                project: project.id,
                what: "lyrics",
            })?;

        self.require(&audio.storage_ref).await?;

        let mut stems = BTreeMap::new();
        if let Some(set) = &project.stems {
            for (class, asset) in &set.stems {
                self.require(&asset.storage_ref).await?;
                stems.insert(*class, asset.storage_ref.clone());
            }
        }

        Ok(ExportManifest {
            project_id: project.id,
            name: project.name.clone(),
            style: project.style,
            audio,
            lyrics: lyrics.text,
            lyrics_style: lyrics.style,
            lyrics_style_label: lyrics.style_label,
            stems,
            generated_at: Utc::now(),
        })
    }

    async fn require(&self, asset: &AssetRef) -> Result<(), ExportError> {
        if self.blobs.exists(asset).await? {
            Ok(())
        } else {
            log::error!("export: referenced asset {asset} is missing");
            Err(ExportError::AssetMissing(asset.clone()))
        }
    }
}
