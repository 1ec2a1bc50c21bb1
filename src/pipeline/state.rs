//! Project lifecycle as an append-only event log.
//!
//! Nothing mutates a [`Project`] in place. The orchestrator appends
//! [`ProjectEvent`]s to a per-project log and the current project is the
//! [`fold`] of that log.
//!
//! ```text
//! Created ──upload──▶ Uploaded ──submit_transform──▶ Transforming
//!    ▲  └──upload──┘     ▲                             │      │
//!    │                   └──────── upload ─────────────┼── Failed(transform)
//!    │                                                 ▼      │ retry
//!    │                                            Transformed ◀┘
//!    │                                                 │ submit_lyrics
//!    │                                                 ▼
//!    │            Failed(lyrics) ◀──────────────── LyricsPending
//!    │              │ retry                            │
//!    │              └────────▶ LyricsPending      LyricsReady ──export──▶ ExportReady
//!    │                                        (both may submit_lyrics again)
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ErrorKind;
use crate::audio::AudioAsset;
use crate::lyrics::StyleSpec;
use crate::separation::StemSet;
use crate::transform::StylePreset;

pub type ProjectId = Uuid;

// ---------------------------------------------------------------------------
// LifecycleState
// ---------------------------------------------------------------------------

/// Which branch a `Failed` project failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedStage {
    Transform,
    Lyrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Uploaded,
    Transforming,
    Transformed,
    LyricsPending,
    LyricsReady,
    ExportReady,
    Failed(FailedStage),
}

impl LifecycleState {
    /// A new original may replace the current one.
    pub fn accepts_upload(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Uploaded | Self::Failed(FailedStage::Transform)
        )
    }

    /// A transform job may start (first run or retry).
    pub fn accepts_transform(&self) -> bool {
        matches!(self, Self::Uploaded | Self::Failed(FailedStage::Transform))
    }

    /// A lyrics job may start (first run, regeneration or retry).
    pub fn accepts_lyrics(&self) -> bool {
        matches!(
            self,
            Self::Transformed
                | Self::LyricsReady
                | Self::ExportReady
                | Self::Failed(FailedStage::Lyrics)
        )
    }

    /// A job of either kind is running.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Transforming | Self::LyricsPending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Uploaded => "uploaded",
            Self::Transforming => "transforming",
            Self::Transformed => "transformed",
            Self::LyricsPending => "lyrics pending",
            Self::LyricsReady => "lyrics ready",
            Self::ExportReady => "export ready",
            Self::Failed(FailedStage::Transform) => "failed (transform)",
            Self::Failed(FailedStage::Lyrics) => "failed (lyrics)",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// Why the last job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// Generated lyrics and the style they were written in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricsRecord {
    pub text: String,
    pub style: StyleSpec,
    /// Preset name or user style name at generation time.
    pub style_label: String,
}

/// Derived view of one project. Produced by [`fold`], never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub style: StylePreset,
    pub state: LifecycleState,
    pub original: Option<AudioAsset>,
    /// Cached separation of `original`, reused by transform retries.
    pub stems: Option<StemSet>,
    pub transformed: Option<AudioAsset>,
    pub lyrics: Option<LyricsRecord>,
    pub last_error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of events folded into this view.
    pub revision: u64,
}

impl Project {
    /// Transformed audio and non-empty lyrics both exist.
    pub fn has_export_inputs(&self) -> bool {
        self.transformed.is_some()
            && self
                .lyrics
                .as_ref()
                .is_some_and(|l| !l.text.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// ProjectEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProjectEvent {
    Created {
        at: DateTime<Utc>,
        id: ProjectId,
        name: String,
        style: StylePreset,
    },
    /// Seeded from a metadata-store snapshot.
    Restored {
        at: DateTime<Utc>,
        project: Box<Project>,
    },
    Uploaded {
        at: DateTime<Utc>,
        asset: AudioAsset,
    },
    TransformStarted {
        at: DateTime<Utc>,
        job_id: Uuid,
    },
    StemsSeparated {
        at: DateTime<Utc>,
        job_id: Uuid,
        stems: StemSet,
    },
    TransformSucceeded {
        at: DateTime<Utc>,
        job_id: Uuid,
        asset: AudioAsset,
    },
    TransformFailed {
        at: DateTime<Utc>,
        job_id: Uuid,
        failure: JobFailure,
    },
    LyricsStarted {
        at: DateTime<Utc>,
        job_id: Uuid,
        style: StyleSpec,
        topic: Option<String>,
    },
    LyricsSucceeded {
        at: DateTime<Utc>,
        job_id: Uuid,
        lyrics: LyricsRecord,
    },
    LyricsFailed {
        at: DateTime<Utc>,
        job_id: Uuid,
        failure: JobFailure,
    },
    Exported {
        at: DateTime<Utc>,
    },
}

impl ProjectEvent {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Created { at, .. }
            | Self::Restored { at, .. }
            | Self::Uploaded { at, .. }
            | Self::TransformStarted { at, .. }
            | Self::StemsSeparated { at, .. }
            | Self::TransformSucceeded { at, .. }
            | Self::TransformFailed { at, .. }
            | Self::LyricsStarted { at, .. }
            | Self::LyricsSucceeded { at, .. }
            | Self::LyricsFailed { at, .. }
            | Self::Exported { at } => *at,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Restored { .. } => "restored",
            Self::Uploaded { .. } => "uploaded",
            Self::TransformStarted { .. } => "transform_started",
            Self::StemsSeparated { .. } => "stems_separated",
            Self::TransformSucceeded { .. } => "transform_succeeded",
            Self::TransformFailed { .. } => "transform_failed",
            Self::LyricsStarted { .. } => "lyrics_started",
            Self::LyricsSucceeded { .. } => "lyrics_succeeded",
            Self::LyricsFailed { .. } => "lyrics_failed",
            Self::Exported { .. } => "exported",
        }
    }
}

// ---------------------------------------------------------------------------
// fold
// ---------------------------------------------------------------------------

/// Apply one event to the folded view.
///
/// Events that arrive before the project exists are ignored; the log is
/// only ever appended to by the orchestrator after validating the
/// transition, so no guard is repeated here.
pub fn apply(project: &mut Option<Project>, event: &ProjectEvent) {
    match event {
        ProjectEvent::Created { at, id, name, style } => {
            *project = Some(Project {
                id: *id,
                name: name.clone(),
                style: *style,
                state: LifecycleState::Created,
                original: None,
                stems: None,
                transformed: None,
                lyrics: None,
                last_error: None,
                created_at: *at,
                updated_at: *at,
                revision: 1,
            });
            return;
        }
        ProjectEvent::Restored { project: snapshot, .. } => {
            *project = Some((**snapshot).clone());
            return;
        }
        _ => {}
    }

    let Some(p) = project.as_mut() else {
        return;
    };
    match event {
        ProjectEvent::Created { .. } | ProjectEvent::Restored { .. } => {}
        ProjectEvent::Uploaded { asset, .. } => {
            p.original = Some(asset.clone());
            p.stems = None;
            p.last_error = None;
            p.state = LifecycleState::Uploaded;
        }
        ProjectEvent::TransformStarted { .. } => {
            p.last_error = None;
            p.state = LifecycleState::Transforming;
        }
        ProjectEvent::StemsSeparated { stems, .. } => {
            p.stems = Some(stems.clone());
        }
        ProjectEvent::TransformSucceeded { asset, .. } => {
            p.transformed = Some(asset.clone());
            p.state = LifecycleState::Transformed;
        }
        ProjectEvent::TransformFailed { failure, .. } => {
            p.last_error = Some(failure.clone());
            p.state = LifecycleState::Failed(FailedStage::Transform);
        }
        ProjectEvent::LyricsStarted { .. } => {
            p.last_error = None;
            p.state = LifecycleState::LyricsPending;
        }
        ProjectEvent::LyricsSucceeded { lyrics, .. } => {
            p.lyrics = Some(lyrics.clone());
            p.state = LifecycleState::LyricsReady;
        }
        ProjectEvent::LyricsFailed { failure, .. } => {
            p.last_error = Some(failure.clone());
            p.state = LifecycleState::Failed(FailedStage::Lyrics);
        }
        ProjectEvent::Exported { .. } => {
            p.state = LifecycleState::ExportReady;
        }
    }
    p.updated_at = event.at();
    p.revision += 1;
}

/// Fold a whole log. `None` when the log never creates the project.
pub fn fold(id: ProjectId, events: &[ProjectEvent]) -> Option<Project> {
    let mut project = None;
    for event in events {
        apply(&mut project, event);
    }
    project.filter(|p| p.id == id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioFormat;
    use crate::store::AssetRef;

    fn asset(name: &str) -> AudioAsset {
        AudioAsset::new(AudioFormat::Wav, 44_100, 1, 4.0, AssetRef(name.into()))
    }

    fn created(id: ProjectId) -> ProjectEvent {
        ProjectEvent::Created {
            at: Utc::now(),
            id,
            name: "demo".into(),
            style: StylePreset::Trap,
        }
    }

    fn lyrics(text: &str) -> LyricsRecord {
        LyricsRecord {
            text: text.into(),
            style: StyleSpec::Preset(StylePreset::Trap),
            style_label: "trap".into(),
        }
    }

    #[test]
    fn empty_log_has_no_project() {
        assert!(fold(Uuid::new_v4(), &[]).is_none());
    }

    #[test]
    fn happy_path_folds_to_lyrics_ready() {
        let id = Uuid::new_v4();
        let job = Uuid::new_v4();
        let events = vec![
            created(id),
            ProjectEvent::Uploaded { at: Utc::now(), asset: asset("a.wav") },
            ProjectEvent::TransformStarted { at: Utc::now(), job_id: job },
            ProjectEvent::TransformSucceeded { at: Utc::now(), job_id: job, asset: asset("t.wav") },
            ProjectEvent::LyricsStarted {
                at: Utc::now(),
                job_id: job,
                style: StyleSpec::Preset(StylePreset::Trap),
                topic: None,
            },
            ProjectEvent::LyricsSucceeded { at: Utc::now(), job_id: job, lyrics: lyrics("[Hook]\nyeah") },
        ];
        let p = fold(id, &events).unwrap();
        assert_eq!(p.state, LifecycleState::LyricsReady);
        assert_eq!(p.revision, events.len() as u64);
        assert!(p.has_export_inputs());
    }

    #[test]
    fn failure_keeps_cached_stems_and_upload_clears_them() {
        let id = Uuid::new_v4();
        let job = Uuid::new_v4();
        let stems = StemSet::new(Default::default());
        let mut events = vec![
            created(id),
            ProjectEvent::Uploaded { at: Utc::now(), asset: asset("a.wav") },
            ProjectEvent::TransformStarted { at: Utc::now(), job_id: job },
            ProjectEvent::StemsSeparated { at: Utc::now(), job_id: job, stems: stems.clone() },
            ProjectEvent::TransformFailed {
                at: Utc::now(),
                job_id: job,
                failure: JobFailure {
                    kind: ErrorKind::ProcessingTimeout,
                    message: "slow".into(),
                },
            },
        ];
        let failed = fold(id, &events).unwrap();
        assert_eq!(failed.state, LifecycleState::Failed(FailedStage::Transform));
        assert_eq!(failed.stems, Some(stems));
        assert_eq!(failed.last_error.as_ref().map(|e| e.kind), Some(ErrorKind::ProcessingTimeout));
        assert!(failed.state.accepts_transform());
        assert!(failed.state.accepts_upload());

        events.push(ProjectEvent::Uploaded { at: Utc::now(), asset: asset("b.wav") });
        let reuploaded = fold(id, &events).unwrap();
        assert_eq!(reuploaded.state, LifecycleState::Uploaded);
        assert!(reuploaded.stems.is_none());
        assert!(reuploaded.last_error.is_none());
    }

    #[test]
    fn restored_snapshot_continues_revision() {
        let id = Uuid::new_v4();
        let mut snapshot = fold(id, &[created(id)]).unwrap();
        snapshot.revision = 7;
        let events = vec![
            ProjectEvent::Restored { at: Utc::now(), project: Box::new(snapshot) },
            ProjectEvent::Uploaded { at: Utc::now(), asset: asset("a.wav") },
        ];
        let p = fold(id, &events).unwrap();
        assert_eq!(p.revision, 8);
        assert_eq!(p.state, LifecycleState::Uploaded);
    }

    #[test]
    fn transitions_guard_each_branch() {
        use LifecycleState::*;
        assert!(Created.accepts_upload());
        assert!(!Created.accepts_transform());
        assert!(!Transformed.accepts_upload());
        assert!(!Transforming.accepts_transform());
        assert!(Transformed.accepts_lyrics());
        assert!(ExportReady.accepts_lyrics());
        assert!(Failed(FailedStage::Lyrics).accepts_lyrics());
        assert!(!Failed(FailedStage::Lyrics).accepts_transform());
        assert!(!LyricsPending.accepts_lyrics());
    }

    #[test]
    fn whitespace_lyrics_are_not_export_inputs() {
        let id = Uuid::new_v4();
        let job = Uuid::new_v4();
        let events = vec![
            created(id),
            ProjectEvent::Uploaded { at: Utc::now(), asset: asset("a.wav") },
            ProjectEvent::TransformStarted { at: Utc::now(), job_id: job },
            ProjectEvent::TransformSucceeded { at: Utc::now(), job_id: job, asset: asset("t.wav") },
            ProjectEvent::LyricsSucceeded { at: Utc::now(), job_id: job, lyrics: lyrics("  \n") },
        ];
        assert!(!fold(id, &events).unwrap().has_export_inputs());
    }

    #[test]
    fn events_serialise_with_tag() {
        let json = serde_json::to_value(ProjectEvent::Exported { at: Utc::now() }).unwrap();
        assert_eq!(json["event"], "exported");
    }
}
