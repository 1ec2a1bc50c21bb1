//! Project lifecycle and job orchestration.
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────── transform branch ─────────────┐
//! create ─▶ upload ─▶ │ ingest ─▶ separate ─▶ transform ─▶ render │ ─┐
//!                     └───────────────────────────────────────────┘  │
//!                                   lyrics branch (needs render)     ├─▶ export
//!                     ┌───────────────────────────────────────────┐  │
//!                     │ prompt ─▶ TextGenerator ─▶ structure check│ ─┘
//!                     └───────────────────────────────────────────┘
//!
//! ProjectEvent log (append-only) ──fold──▶ Project ──upsert──▶ MetadataStore
//! ```
//!
//! Every state change is an event appended by [`PipelineOrchestrator`];
//! [`Project`] is always a fold of that log. Jobs report progress through
//! [`JobHandle`]s and at most one job per branch runs per project.

pub mod error;
pub mod export;
pub mod job;
pub mod runner;
pub mod state;

pub use error::{ErrorKind, PipelineError};
pub use export::{ExportBundler, ExportError, ExportManifest, ExportReadiness};
pub use job::{JobHandle, JobKind, JobSnapshot, JobStatus, Stage};
pub use runner::PipelineOrchestrator;
pub use state::{
    FailedStage, JobFailure, LifecycleState, LyricsRecord, Project, ProjectEvent, ProjectId,
};
