//! Outward error type of the orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::export::ExportError;
use super::job::{JobHandle, JobKind};
use super::state::{LifecycleState, ProjectId};
use crate::audio::AudioError;
use crate::lyrics::LyricsError;
use crate::reconstruct::ReconstructError;
use crate::separation::SeparationError;
use crate::store::StoreError;
use crate::transform::TransformError;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Serialisable classification of a [`PipelineError`], stored on failure
/// events so a restored project still knows why it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidAudio,
    ProcessingTimeout,
    Generation,
    Consistency,
    ConcurrencyConflict,
    InvalidInput,
    ProjectNotFound,
    InvalidTransition,
    StyleNotFound,
    StyleInUse,
    Cancelled,
    Storage,
    Internal,
}

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Corrupt or unsupported input. User-fixable, never retried.
    #[error("invalid audio: {0}")]
    InvalidAudio(String),

    /// A stage exceeded its time or complexity ceiling.
    #[error("processing timeout: {0}")]
    ProcessingTimeout(String),

    /// The generative-text backend failed for good.
    #[error("lyrics generation failed: {0}")]
    Generation(String),

    /// A referenced asset is missing. Indicates a broken invariant.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// A job of this kind is already running; its handle is returned.
    #[error("a {} job is already running for project {}", existing.kind(), existing.project_id())]
    ConcurrencyConflict { existing: JobHandle },

    /// Caller input rejected before any work started (length caps, empty names).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),

    #[error("cannot {action} while project is {state}")]
    InvalidTransition {
        action: &'static str,
        state: LifecycleState,
    },

    #[error("user style {0} not found")]
    StyleNotFound(Uuid),

    #[error("user style {0} is referenced by generated lyrics")]
    StyleInUse(Uuid),

    #[error("{0} job cancelled")]
    Cancelled(JobKind),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAudio(_) => ErrorKind::InvalidAudio,
            Self::ProcessingTimeout(_) => ErrorKind::ProcessingTimeout,
            Self::Generation(_) => ErrorKind::Generation,
            Self::Consistency(_) => ErrorKind::Consistency,
            Self::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::ProjectNotFound(_) => ErrorKind::ProjectNotFound,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::StyleNotFound(_) => ErrorKind::StyleNotFound,
            Self::StyleInUse(_) => ErrorKind::StyleInUse,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only stage timeouts are retried by the orchestrator.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProcessingTimeout(_))
    }

    /// The running job's handle for a [`ConcurrencyConflict`](Self::ConcurrencyConflict).
    pub fn existing_job(&self) -> Option<&JobHandle> {
        match self {
            Self::ConcurrencyConflict { existing } => Some(existing),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions from subsystem errors
// ---------------------------------------------------------------------------

impl From<AudioError> for PipelineError {
    fn from(e: AudioError) -> Self {
        Self::InvalidAudio(e.to_string())
    }
}

impl From<SeparationError> for PipelineError {
    fn from(e: SeparationError) -> Self {
        match e {
            SeparationError::InvalidAudio(_) => Self::InvalidAudio(e.to_string()),
            SeparationError::ProcessingTimeout { .. } => Self::ProcessingTimeout(e.to_string()),
            SeparationError::ResidualTooHigh { .. } => Self::Internal(e.to_string()),
        }
    }
}

impl From<TransformError> for PipelineError {
    fn from(e: TransformError) -> Self {
        match e {
            TransformError::InvalidAudio(_) => Self::InvalidAudio(e.to_string()),
            TransformError::Resample(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<ReconstructError> for PipelineError {
    fn from(e: ReconstructError) -> Self {
        match e {
            ReconstructError::InvalidAudio(_) => Self::InvalidAudio(e.to_string()),
            ReconstructError::ProcessingTimeout { .. } => Self::ProcessingTimeout(e.to_string()),
        }
    }
}

impl From<LyricsError> for PipelineError {
    fn from(e: LyricsError) -> Self {
        match e {
            LyricsError::InputTooLong { .. } => Self::InvalidInput(e.to_string()),
            _ => Self::Generation(e.to_string()),
        }
    }
}

impl From<ExportError> for PipelineError {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::Storage(inner) => Self::Storage(inner),
            ExportError::Serialize(_) => Self::Internal(e.to_string()),
            ExportError::Missing { .. } | ExportError::AssetMissing(_) => {
                Self::Consistency(e.to_string())
            }
        }
    }
}

impl From<hound::Error> for PipelineError {
    fn from(e: hound::Error) -> Self {
        Self::Internal(format!("wav codec: {e}"))
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("worker task failed: {e}"))
    }
}
