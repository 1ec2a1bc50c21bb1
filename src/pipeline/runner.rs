//! Pipeline orchestrator: the only writer of project state.
//!
//! [`PipelineOrchestrator`] validates every transition against the folded
//! project, appends the resulting event to the per-project log and spawns
//! the long-running jobs as tokio tasks.
//!
//! # Transform job
//!
//! ```text
//! submit_transform
//!   └─▶ TransformStarted ─▶ tokio::spawn
//!         ├─ ingest       spawn_blocking(IngestValidator::ingest)
//!         ├─ separate     cached StemSet ─▶ reload      ┐ StemsSeparated
//!         │               else spawn_blocking(separate) ┘ (stems persisted)
//!         ├─ transform    JoinSet: one spawn_blocking per stem ─▶ join
//!         └─ reconstruct  grid ─▶ JoinSet per stem ─▶ join ─▶ mix ─▶ WAV
//!       ─▶ TransformSucceeded | TransformFailed
//! ```
//!
//! Each stage runs under its own timeout. `ProcessingTimeout` is retried
//! with backoff inside the stage; any other error ends the job. The cancel
//! flag is read before each stage starts.
//!
//! # Locks
//!
//! Order is `styles` → `jobs` → `log`; any subset is taken in that order.
//! No lock is held across an `.await`.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::error::{ErrorKind, PipelineError};
use super::export::{ExportBundler, ExportManifest, ExportReadiness};
use super::job::{JobHandle, JobKind, JobSlots, JobStatus, SlotGuard, Stage};
use super::state::{
    apply, fold, FailedStage, JobFailure, LifecycleState, LyricsRecord, Project, ProjectEvent,
    ProjectId,
};
use crate::audio::rng::{derive_component_seed, derive_job_seed};
use crate::audio::{wav, AudioAsset, AudioFormat, IngestValidator, NormalizedAudio};
use crate::config::AppConfig;
use crate::lyrics::{LyricsGenerator, ResolvedStyle, StyleSpec, TextGenerator, UserStyle};
use crate::reconstruct::{mix, MidiReconstructor};
use crate::retry::Backoff;
use crate::separation::{residual_db, InstrumentClass, StemSeparator, StemSet, Stems};
use crate::store::{BlobStore, MetadataStore, StoreError};
use crate::transform::{SpectralTransformer, StylePreset, TransformParams};

type Tracks = BTreeMap<InstrumentClass, Vec<f32>>;

// ---------------------------------------------------------------------------
// PipelineOrchestrator
// ---------------------------------------------------------------------------

/// Drives projects through upload, transform, lyrics and export.
///
/// Cheap to clone; clones share every project, job and style.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use lyrics_beats::config::AppConfig;
/// use lyrics_beats::lyrics::ApiTextGenerator;
/// use lyrics_beats::pipeline::PipelineOrchestrator;
/// use lyrics_beats::store::{FsBlobStore, MemoryMetadataStore};
/// use lyrics_beats::transform::StylePreset;
///
/// # async fn example(bytes: Vec<u8>) -> Result<(), lyrics_beats::pipeline::PipelineError> {
/// let config = AppConfig::default();
/// let orchestrator = PipelineOrchestrator::new(
///     config.clone(),
///     Arc::new(FsBlobStore::new(config.assets_dir())),
///     Arc::new(MemoryMetadataStore::new()),
///     Arc::new(ApiTextGenerator::from_config(&config.llm)),
/// );
///
/// let project = orchestrator.create_project("demo", StylePreset::Trap).await?;
/// orchestrator.upload(project.id, bytes, "audio/wav").await?;
/// orchestrator.submit_transform(project.id).await?.wait().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: AppConfig,
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    ingest: IngestValidator,
    separator: StemSeparator,
    transformer: SpectralTransformer,
    reconstructor: MidiReconstructor,
    lyrics: LyricsGenerator,
    bundler: ExportBundler,
    log: Mutex<HashMap<ProjectId, Vec<ProjectEvent>>>,
    jobs: Arc<JobSlots>,
    styles: Mutex<HashMap<Uuid, UserStyle>>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: AppConfig,
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        text: Arc<dyn TextGenerator>,
    ) -> Self {
        let inner = Inner {
            ingest: IngestValidator::new(config.ingest.clone()),
            separator: StemSeparator::new(config.separation.clone()),
            transformer: SpectralTransformer::new(&config.transform),
            reconstructor: MidiReconstructor::new(config.reconstruction.clone()),
            lyrics: LyricsGenerator::new(config.lyrics.clone(), text),
            bundler: ExportBundler::new(Arc::clone(&blobs)),
            blobs,
            metadata,
            config,
            log: Mutex::new(HashMap::new()),
            jobs: Arc::new(JobSlots::default()),
            styles: Mutex::new(HashMap::new()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    pub async fn create_project(
        &self,
        name: &str,
        style: StylePreset,
    ) -> Result<Project, PipelineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PipelineError::InvalidInput("project name is empty".into()));
        }
        let id = Uuid::new_v4();
        let event = ProjectEvent::Created {
            at: Utc::now(),
            id,
            name: name.to_string(),
            style,
        };
        let project = {
            let mut log = self.inner.log();
            let events = log.entry(id).or_default();
            events.push(event);
            fold(id, events)
        }
        .ok_or_else(|| PipelineError::Internal("created project did not fold".into()))?;

        log::info!("pipeline: created project {id} ({name}, {style})");
        self.inner.persist(&project).await;
        Ok(project)
    }

    /// Current state of a project, restoring it from the metadata store if
    /// this process has not seen it yet.
    pub async fn project(&self, id: ProjectId) -> Result<Project, PipelineError> {
        self.inner.ensure_loaded(id).await?;
        self.inner.current(id)
    }

    /// Ids of every project known to this process.
    pub fn projects(&self) -> Vec<ProjectId> {
        let mut ids: Vec<ProjectId> = self.inner.log().keys().copied().collect();
        ids.sort();
        ids
    }

    /// The append-only event log of a project.
    pub async fn history(&self, id: ProjectId) -> Result<Vec<ProjectEvent>, PipelineError> {
        self.inner.ensure_loaded(id).await?;
        self.inner
            .log()
            .get(&id)
            .cloned()
            .ok_or(PipelineError::ProjectNotFound(id))
    }

    // -----------------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------------

    /// Validate and store a new original. Replaces an earlier upload (and
    /// drops its cached stems) as long as no transform is running.
    pub async fn upload(
        &self,
        id: ProjectId,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<Project, PipelineError> {
        self.inner.ensure_loaded(id).await?;
        self.inner.check_upload(id, &self.inner.jobs.lock())?;

        let inner = Arc::clone(&self.inner);
        let ct = content_type.to_string();
        let (info, bytes) = tokio::task::spawn_blocking(move || {
            let info = inner.ingest.inspect(&bytes, &ct);
            (info, bytes)
        })
        .await?;
        let info = info.map_err(|e| {
            log::warn!("pipeline: rejected upload for {id}: {e}");
            PipelineError::from(e)
        })?;

        let storage_ref = self
            .inner
            .blobs
            .put(bytes, info.format.content_type())
            .await?;
        let asset = AudioAsset::new(
            info.format,
            info.sample_rate,
            info.channels,
            info.duration_secs,
            storage_ref.clone(),
        );

        let appended = {
            let jobs = self.inner.jobs.lock();
            self.inner.check_upload(id, &jobs).and_then(|_| {
                self.inner.append(
                    id,
                    ProjectEvent::Uploaded {
                        at: Utc::now(),
                        asset,
                    },
                )
            })
        };
        let project = match appended {
            Ok(project) => project,
            Err(e) => {
                if let Err(del) = self.inner.blobs.delete(&storage_ref).await {
                    log::warn!("pipeline: could not drop orphaned upload {storage_ref}: {del}");
                }
                return Err(e);
            }
        };

        log::info!(
            "pipeline: {id} uploaded {:?} {}Hz x{} {:.2}s",
            info.format,
            info.sample_rate,
            info.channels,
            info.duration_secs
        );
        self.inner.persist(&project).await;
        Ok(project)
    }

    // -----------------------------------------------------------------------
    // Transform
    // -----------------------------------------------------------------------

    /// Start the transform job, or fail with `ConcurrencyConflict` carrying
    /// the handle of the job already running.
    pub async fn submit_transform(&self, id: ProjectId) -> Result<JobHandle, PipelineError> {
        self.inner.ensure_loaded(id).await?;

        let (handle, project) = {
            let mut jobs = self.inner.jobs.lock();
            if let Some(existing) = jobs.get(&(id, JobKind::Transform)) {
                log::debug!("pipeline: {id} transform already running ({})", existing.id());
                return Err(PipelineError::ConcurrencyConflict {
                    existing: existing.clone(),
                });
            }
            let handle = JobHandle::new(id, JobKind::Transform);
            let project = self.inner.append_checked(id, |p| {
                if !p.state.accepts_transform() || p.original.is_none() {
                    return Err(PipelineError::InvalidTransition {
                        action: "start a transform",
                        state: p.state,
                    });
                }
                Ok(ProjectEvent::TransformStarted {
                    at: Utc::now(),
                    job_id: handle.id(),
                })
            })?;
            jobs.insert((id, JobKind::Transform), handle.clone());
            (handle, project)
        };

        log::info!(
            "pipeline: {id} transform job {} started (stems cached: {})",
            handle.id(),
            project.stems.is_some()
        );
        self.inner.persist(&project).await;

        let guard = SlotGuard::new(Arc::clone(&self.inner.jobs), &handle);
        tokio::spawn(Arc::clone(&self.inner).run_transform(handle.clone(), guard, project));
        Ok(handle)
    }

    /// Flag the running transform for cancellation. Takes effect at the next
    /// stage boundary.
    pub async fn cancel_transform(&self, id: ProjectId) -> Result<JobHandle, PipelineError> {
        self.inner.ensure_loaded(id).await?;
        match self.inner.jobs.get(id, JobKind::Transform) {
            Some(handle) => {
                log::info!("pipeline: {id} cancel requested for job {}", handle.id());
                handle.request_cancel();
                Ok(handle)
            }
            None => Err(PipelineError::InvalidTransition {
                action: "cancel a transform",
                state: self.inner.current(id)?.state,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Lyrics
    // -----------------------------------------------------------------------

    /// Start a lyrics job; same single-flight rule as transforms, with its
    /// own slot.
    pub async fn submit_lyrics(
        &self,
        id: ProjectId,
        style: StyleSpec,
        topic: Option<String>,
    ) -> Result<JobHandle, PipelineError> {
        self.inner.ensure_loaded(id).await?;

        // The styles guard spans resolve and append so a concurrent delete
        // either wins before the lookup or sees `LyricsStarted`.
        let (handle, project, resolved) = {
            let styles = self.inner.styles();
            let resolved = resolve_style(&styles, style)?;
            self.inner
                .lyrics
                .validate_request(&resolved, topic.as_deref())?;

            let mut jobs = self.inner.jobs.lock();
            if let Some(existing) = jobs.get(&(id, JobKind::Lyrics)) {
                return Err(PipelineError::ConcurrencyConflict {
                    existing: existing.clone(),
                });
            }
            let handle = JobHandle::new(id, JobKind::Lyrics);
            let project = self.inner.append_checked(id, |p| {
                if !p.state.accepts_lyrics() || p.transformed.is_none() {
                    return Err(PipelineError::InvalidTransition {
                        action: "generate lyrics",
                        state: p.state,
                    });
                }
                Ok(ProjectEvent::LyricsStarted {
                    at: Utc::now(),
                    job_id: handle.id(),
                    style,
                    topic: topic.clone(),
                })
            })?;
            jobs.insert((id, JobKind::Lyrics), handle.clone());
            (handle, project, resolved)
        };

        log::info!("pipeline: {id} lyrics job {} started ({style})", handle.id());
        self.inner.persist(&project).await;

        let guard = SlotGuard::new(Arc::clone(&self.inner.jobs), &handle);
        tokio::spawn(Arc::clone(&self.inner).run_lyrics(handle.clone(), guard, resolved, topic));
        Ok(handle)
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    /// Recompute readiness from the project's assets. Never appends events
    /// itself; the only side effect is the one-time restore of a project this
    /// process has not loaded yet (see `ensure_loaded`), which may surface an
    /// interrupted job as failed.
    pub async fn query_export_readiness(
        &self,
        id: ProjectId,
    ) -> Result<ExportReadiness, PipelineError> {
        let project = self.project(id).await?;
        if !project.has_export_inputs() {
            return Ok(ExportReadiness::not_ready());
        }
        let manifest = self.inner.bundler.bundle(&project).await?;
        Ok(ExportReadiness {
            ready: true,
            manifest: Some(manifest),
        })
    }

    /// Build the manifest and mark the project `ExportReady`.
    ///
    /// The transition is only recorded from `LyricsReady`; exporting again
    /// later (or while new lyrics are generating) just returns a manifest.
    pub async fn export(&self, id: ProjectId) -> Result<ExportManifest, PipelineError> {
        let project = self.project(id).await?;
        if !project.has_export_inputs() {
            return Err(PipelineError::InvalidTransition {
                action: "export",
                state: project.state,
            });
        }
        let manifest = self.inner.bundler.bundle(&project).await?;

        let marked = self.inner.append_checked(id, |p| {
            if p.state == LifecycleState::LyricsReady {
                Ok(ProjectEvent::Exported { at: Utc::now() })
            } else {
                Err(PipelineError::InvalidTransition {
                    action: "mark exported",
                    state: p.state,
                })
            }
        });
        match marked {
            Ok(project) => {
                log::info!("pipeline: {id} export ready");
                self.inner.persist(&project).await;
            }
            Err(e) => log::debug!("pipeline: {id} exported without transition: {e}"),
        }
        Ok(manifest)
    }

    // -----------------------------------------------------------------------
    // User styles
    // -----------------------------------------------------------------------

    pub fn create_user_style(
        &self,
        name: &str,
        description: &str,
        samples: Vec<String>,
    ) -> Result<UserStyle, PipelineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PipelineError::InvalidInput("style name is empty".into()));
        }
        let style = UserStyle::new(name, description.trim(), samples);
        self.inner.lyrics.validate_style(&style)?;

        self.inner.styles().insert(style.id, style.clone());
        log::info!("pipeline: user style {} ({}) created", style.id, style.name);
        Ok(style)
    }

    pub fn user_styles(&self) -> Vec<UserStyle> {
        let mut styles: Vec<UserStyle> = self.inner.styles().values().cloned().collect();
        styles.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        styles
    }

    /// Delete a style no lyrics job has used or is using.
    pub fn delete_user_style(&self, id: Uuid) -> Result<(), PipelineError> {
        let mut styles = self.inner.styles();
        if !styles.contains_key(&id) {
            return Err(PipelineError::StyleNotFound(id));
        }
        if self.inner.style_referenced(id) {
            return Err(PipelineError::StyleInUse(id));
        }
        styles.remove(&id);
        log::info!("pipeline: user style {id} deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Inner: log, persistence, transitions
// ---------------------------------------------------------------------------

impl Inner {
    fn log(&self) -> MutexGuard<'_, HashMap<ProjectId, Vec<ProjectEvent>>> {
        self.log.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn styles(&self) -> MutexGuard<'_, HashMap<Uuid, UserStyle>> {
        self.styles.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn current(&self, id: ProjectId) -> Result<Project, PipelineError> {
        let log = self.log();
        log.get(&id)
            .and_then(|events| fold(id, events))
            .ok_or(PipelineError::ProjectNotFound(id))
    }

    /// Append an event the caller has already validated.
    fn append(&self, id: ProjectId, event: ProjectEvent) -> Result<Project, PipelineError> {
        self.append_checked(id, |_| Ok(event))
    }

    /// Fold the log, let `decide` pick the next event from the current
    /// project, append it, and return the new project. Runs under the log
    /// lock so no other transition can interleave.
    fn append_checked<F>(&self, id: ProjectId, decide: F) -> Result<Project, PipelineError>
    where
        F: FnOnce(&Project) -> Result<ProjectEvent, PipelineError>,
    {
        let mut log = self.log();
        let events = log.get_mut(&id).ok_or(PipelineError::ProjectNotFound(id))?;
        let mut project = fold(id, events);
        let current = project.as_ref().ok_or(PipelineError::ProjectNotFound(id))?;
        let event = decide(current)?;
        log::debug!("pipeline: {id} <- {}", event.name());
        apply(&mut project, &event);
        events.push(event);
        project.ok_or(PipelineError::ProjectNotFound(id))
    }

    /// Callers pass the locked job map so the check and the append that
    /// follows see the same slots.
    fn check_upload(
        &self,
        id: ProjectId,
        jobs: &HashMap<(ProjectId, JobKind), JobHandle>,
    ) -> Result<(), PipelineError> {
        if let Some(existing) = jobs.get(&(id, JobKind::Transform)) {
            return Err(PipelineError::ConcurrencyConflict {
                existing: existing.clone(),
            });
        }
        let state = self.current(id)?.state;
        if state.accepts_upload() {
            Ok(())
        } else {
            Err(PipelineError::InvalidTransition {
                action: "upload",
                state,
            })
        }
    }

    /// Snapshots are a best-effort mirror of the log.
    async fn persist(&self, project: &Project) {
        if let Err(e) = self.metadata.upsert(project).await {
            log::warn!(
                "pipeline: failed to persist {} at revision {}: {e}",
                project.id,
                project.revision
            );
        }
    }

    /// Seed the log from the metadata store the first time a project id is
    /// seen. A job that was running when the snapshot was taken can no
    /// longer finish, so it is surfaced as failed.
    async fn ensure_loaded(&self, id: ProjectId) -> Result<(), PipelineError> {
        if self.log().contains_key(&id) {
            return Ok(());
        }
        let mut project = self
            .metadata
            .find(id)
            .await?
            .ok_or(PipelineError::ProjectNotFound(id))?;

        let interrupted = match project.state {
            LifecycleState::Transforming => Some(FailedStage::Transform),
            LifecycleState::LyricsPending => Some(FailedStage::Lyrics),
            _ => None,
        };
        if let Some(stage) = interrupted {
            log::warn!("pipeline: {id} restored with an interrupted {stage:?} job");
            project.state = LifecycleState::Failed(stage);
            project.last_error = Some(JobFailure {
                kind: ErrorKind::Internal,
                message: "job interrupted before completion".into(),
            });
        }

        let mut log = self.log();
        log.entry(id).or_insert_with(|| {
            log::info!("pipeline: restored {id} at revision {}", project.revision);
            vec![ProjectEvent::Restored {
                at: Utc::now(),
                project: Box::new(project),
            }]
        });
        Ok(())
    }

    /// A style is referenced once any lyrics job using it succeeded or is
    /// still running.
    fn style_referenced(&self, style_id: Uuid) -> bool {
        let target = StyleSpec::User(style_id);
        let log = self.log();
        log.iter().any(|(id, events)| {
            let pending = fold(*id, events)
                .is_some_and(|p| p.state == LifecycleState::LyricsPending);
            events.iter().any(|event| match event {
                ProjectEvent::LyricsSucceeded { lyrics, .. } => lyrics.style == target,
                ProjectEvent::LyricsStarted { style, .. } => pending && *style == target,
                ProjectEvent::Restored { project, .. } => project
                    .lyrics
                    .as_ref()
                    .is_some_and(|l| l.style == target),
                _ => false,
            })
        })
    }

    /// Record a job's outcome, free its slot, then publish the terminal
    /// status so a waiter observes the final project and a free slot.
    async fn complete(
        &self,
        handle: &JobHandle,
        guard: SlotGuard,
        event: ProjectEvent,
        status: JobStatus,
    ) {
        match self.append(handle.project_id(), event) {
            Ok(project) => self.persist(&project).await,
            Err(e) => log::error!("pipeline: could not record job {}: {e}", handle.id()),
        }
        drop(guard);
        handle.finish(status);
    }
}

// ---------------------------------------------------------------------------
// Inner: transform job
// ---------------------------------------------------------------------------

impl Inner {
    async fn run_transform(self: Arc<Self>, handle: JobHandle, guard: SlotGuard, project: Project) {
        let id = project.id;
        let result = self.transform_job(&handle, &project).await;

        let (event, status) = match result {
            Ok(asset) => {
                log::info!(
                    "pipeline: {id} transform succeeded ({:.2}s)",
                    asset.duration_secs
                );
                (
                    ProjectEvent::TransformSucceeded {
                        at: Utc::now(),
                        job_id: handle.id(),
                        asset,
                    },
                    JobStatus::Succeeded,
                )
            }
            Err(e) => {
                log::error!("pipeline: {id} transform failed: {e}");
                let failure = JobFailure {
                    kind: e.kind(),
                    message: e.to_string(),
                };
                (
                    ProjectEvent::TransformFailed {
                        at: Utc::now(),
                        job_id: handle.id(),
                        failure: failure.clone(),
                    },
                    JobStatus::Failed {
                        kind: failure.kind,
                        message: failure.message,
                    },
                )
            }
        };
        self.complete(&handle, guard, event, status).await;
    }

    async fn transform_job(
        self: &Arc<Self>,
        handle: &JobHandle,
        project: &Project,
    ) -> Result<AudioAsset, PipelineError> {
        let original = project.original.clone().ok_or_else(|| {
            PipelineError::Consistency(format!("project {} has no original", project.id))
        })?;
        let bytes = Arc::new(self.fetch(&original).await?);
        let preset = project.style;
        let params = preset.transform_params();
        let job_seed = derive_job_seed(&bytes, preset.name(), self.config.transform.base_seed);
        let timeouts = &self.config.pipeline;

        // ── ingest ──────────────────────────────────────────────────────
        let audio: Arc<NormalizedAudio> = Arc::new(
            self.run_stage(handle, Stage::Ingest, timeouts.ingest_timeout(), || {
                let inner = Arc::clone(self);
                let bytes = Arc::clone(&bytes);
                let ct = original.format.content_type();
                async move {
                    let audio = tokio::task::spawn_blocking(move || inner.ingest.ingest(&bytes, ct))
                        .await??;
                    Ok::<_, PipelineError>(audio)
                }
            })
            .await?,
        );

        // ── separate (or reuse) ─────────────────────────────────────────
        let cached = project.stems.clone();
        let stems = self
            .run_stage(handle, Stage::Separate, timeouts.separation_timeout(), || {
                let inner = Arc::clone(self);
                let audio = Arc::clone(&audio);
                let cached = cached.clone();
                async move {
                    if let Some(set) = cached {
                        match inner.load_stems(&set, &audio.samples).await {
                            Ok(stems) => {
                                log::info!(
                                    "pipeline: {} reusing cached stems {}",
                                    handle.project_id(),
                                    set.id
                                );
                                return Ok::<_, PipelineError>((stems, None));
                            }
                            Err(e) => log::warn!(
                                "pipeline: {} cached stems unusable ({e}), separating again",
                                handle.project_id()
                            ),
                        }
                    }
                    let worker = Arc::clone(&inner);
                    let source = Arc::clone(&audio);
                    let stems = tokio::task::spawn_blocking(move || {
                        worker.separator.separate(&source.samples, source.sample_rate)
                    })
                    .await??;
                    let set = inner.store_stems(&stems).await?;
                    Ok((stems, Some(set)))
                }
            })
            .await?;
        let (stems, fresh) = stems;
        if let Some(set) = fresh {
            let project = self.append(
                handle.project_id(),
                ProjectEvent::StemsSeparated {
                    at: Utc::now(),
                    job_id: handle.id(),
                    stems: set,
                },
            )?;
            self.persist(&project).await;
        }
        let sample_rate = stems.sample_rate;
        let tracks = Arc::new(stems.tracks);

        // ── spectral transform (per-stem fan-out) ───────────────────────
        let transformed = Arc::new(
            self.run_stage(handle, Stage::Transform, timeouts.transform_timeout(), || {
                self.transform_stems(Arc::clone(&tracks), sample_rate, params.clone())
            })
            .await?,
        );

        // ── reconstruct (per-stem fan-out, then mix) ────────────────────
        let rendered = self
            .run_stage(
                handle,
                Stage::Reconstruct,
                timeouts.reconstruction_timeout(),
                || self.reconstruct_stems(Arc::clone(&transformed), sample_rate, job_seed),
            )
            .await?;

        let duration_secs = rendered.len() as f64 / sample_rate as f64;
        let wav_bytes = tokio::task::spawn_blocking(move || {
            wav::encode_pcm16_dithered(&rendered, sample_rate, job_seed)
        })
        .await??;
        let storage_ref = self
            .blobs
            .put(wav_bytes, AudioFormat::Wav.content_type())
            .await?;
        Ok(AudioAsset::new(
            AudioFormat::Wav,
            sample_rate,
            1,
            duration_secs,
            storage_ref,
        ))
    }

    /// Run one stage under its timeout, retrying `ProcessingTimeout` with
    /// backoff. The cancel flag is checked before the stage starts only.
    async fn run_stage<T, F, Fut>(
        &self,
        handle: &JobHandle,
        stage: Stage,
        limit: Duration,
        mut attempt: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        if handle.cancel_requested() {
            log::info!("pipeline: {} cancelled before {stage}", handle.project_id());
            return Err(PipelineError::Cancelled(handle.kind()));
        }
        handle.start_stage(stage);
        let mut backoff = Backoff::new(self.config.pipeline.retry);

        loop {
            log::debug!(
                "pipeline: {} {stage} attempt {}",
                handle.project_id(),
                backoff.attempt()
            );
            // A timed-out blocking task keeps running detached; its result
            // is discarded.
            let outcome = match tokio::time::timeout(limit, attempt()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(PipelineError::ProcessingTimeout(format!(
                    "{stage} exceeded {}s",
                    limit.as_secs_f32()
                ))),
            };
            match outcome {
                Ok(value) => {
                    handle.advance(stage.cumulative());
                    log::info!(
                        "pipeline: {} {stage} done ({}%)",
                        handle.project_id(),
                        handle.progress()
                    );
                    return Ok(value);
                }
                Err(e) if e.is_retryable() => match backoff.next_delay() {
                    Some(delay) => {
                        log::warn!(
                            "pipeline: {} {stage} attempt {} failed ({e}), retrying in {delay:?}",
                            handle.project_id(),
                            backoff.attempt() - 1
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch(&self, asset: &AudioAsset) -> Result<Vec<u8>, PipelineError> {
        match self.blobs.get(&asset.storage_ref).await {
            Ok(bytes) => Ok(bytes),
            Err(StoreError::NotFound(r)) => Err(PipelineError::Consistency(format!(
                "asset {r} is missing from storage"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist each separated stem as a float WAV so a retry reloads it
    /// bit-exact.
    async fn store_stems(&self, stems: &Stems) -> Result<StemSet, PipelineError> {
        let mut assets = BTreeMap::new();
        for (class, samples) in &stems.tracks {
            let bytes = wav::encode_f32(samples, stems.sample_rate)?;
            let storage_ref = self
                .blobs
                .put(bytes, AudioFormat::Wav.content_type())
                .await?;
            assets.insert(
                *class,
                AudioAsset::new(
                    AudioFormat::Wav,
                    stems.sample_rate,
                    1,
                    samples.len() as f64 / stems.sample_rate as f64,
                    storage_ref,
                ),
            );
        }
        Ok(StemSet::new(assets))
    }

    async fn load_stems(&self, set: &StemSet, original: &[f32]) -> Result<Stems, PipelineError> {
        let mut tracks = BTreeMap::new();
        let mut sample_rate = 0;
        for class in InstrumentClass::ALL {
            let asset = set.get(class).ok_or_else(|| {
                PipelineError::Consistency(format!("stem set {} has no {class} stem", set.id))
            })?;
            let bytes = self.fetch(asset).await?;
            let (samples, rate) = wav::decode_mono(&bytes)?;
            sample_rate = rate;
            tracks.insert(class, samples);
        }
        let mut stems = Stems {
            sample_rate,
            tracks,
            residual_db: 0.0,
        };
        if stems.len() != original.len() {
            return Err(PipelineError::Consistency(format!(
                "cached stems have {} samples, original has {}",
                stems.len(),
                original.len()
            )));
        }
        stems.residual_db = residual_db(original, &stems.sum());
        Ok(stems)
    }

    /// Fan each stem out to the blocking pool and join them all.
    async fn transform_stems(
        self: &Arc<Self>,
        tracks: Arc<Tracks>,
        sample_rate: u32,
        params: TransformParams,
    ) -> Result<Tracks, PipelineError> {
        let params = Arc::new(params);
        let mut set = JoinSet::new();
        for class in tracks.keys().copied() {
            let inner = Arc::clone(self);
            let tracks = Arc::clone(&tracks);
            let params = Arc::clone(&params);
            set.spawn_blocking(move || {
                let samples = tracks.get(&class).map(Vec::as_slice).unwrap_or(&[]);
                inner
                    .transformer
                    .transform_stem(samples, sample_rate, &params)
                    .map(|out| (class, out))
            });
        }
        join_all(set).await
    }

    /// Shared grid, per-stem reconstruction in parallel, then the mix.
    async fn reconstruct_stems(
        self: &Arc<Self>,
        tracks: Arc<Tracks>,
        sample_rate: u32,
        job_seed: u32,
    ) -> Result<Vec<f32>, PipelineError> {
        let inner = Arc::clone(self);
        let source = Arc::clone(&tracks);
        let grid = tokio::task::spawn_blocking(move || {
            inner.reconstructor.estimate_grid(&source, sample_rate)
        })
        .await?;

        let mut set = JoinSet::new();
        for class in tracks.keys().copied() {
            let inner = Arc::clone(self);
            let tracks = Arc::clone(&tracks);
            let seed = derive_component_seed(job_seed, class.name());
            set.spawn_blocking(move || {
                let samples = tracks.get(&class).map(Vec::as_slice).unwrap_or(&[]);
                inner
                    .reconstructor
                    .reconstruct_stem(class, samples, sample_rate, &grid, seed)
                    .map(|out| (class, out))
            });
        }
        let rendered = join_all(set).await?;
        Ok(tokio::task::spawn_blocking(move || mix(&rendered)).await?)
    }
}

fn resolve_style(
    styles: &HashMap<Uuid, UserStyle>,
    spec: StyleSpec,
) -> Result<ResolvedStyle, PipelineError> {
    match spec {
        StyleSpec::Preset(preset) => Ok(ResolvedStyle::Preset(preset)),
        StyleSpec::User(id) => styles
            .get(&id)
            .cloned()
            .map(ResolvedStyle::User)
            .ok_or(PipelineError::StyleNotFound(id)),
    }
}

/// Join barrier: every stem must finish before the next stage runs. The
/// first failure aborts the remaining tasks when the set is dropped.
async fn join_all<E>(
    mut set: JoinSet<Result<(InstrumentClass, Vec<f32>), E>>,
) -> Result<Tracks, PipelineError>
where
    E: Into<PipelineError> + 'static,
{
    let mut out = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        let stem: Result<_, PipelineError> = joined?.map_err(Into::into);
        let (class, samples) = stem?;
        out.insert(class, samples);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Inner: lyrics job
// ---------------------------------------------------------------------------

impl Inner {
    async fn run_lyrics(
        self: Arc<Self>,
        handle: JobHandle,
        guard: SlotGuard,
        style: ResolvedStyle,
        topic: Option<String>,
    ) {
        let id = handle.project_id();
        handle.advance(0);
        let result = self
            .lyrics
            .generate(&style, topic.as_deref())
            .await
            .map_err(PipelineError::from);

        let (event, status) = match result {
            Ok(generated) => {
                if !generated.structure_matches() {
                    log::warn!(
                        "pipeline: {id} lyrics accepted with {}v/{}h",
                        generated.found.verses,
                        generated.found.hooks
                    );
                }
                (
                    ProjectEvent::LyricsSucceeded {
                        at: Utc::now(),
                        job_id: handle.id(),
                        lyrics: LyricsRecord {
                            text: generated.text,
                            style: style.spec(),
                            style_label: style.label(),
                        },
                    },
                    JobStatus::Succeeded,
                )
            }
            Err(e) => {
                log::error!("pipeline: {id} lyrics failed: {e}");
                (
                    ProjectEvent::LyricsFailed {
                        at: Utc::now(),
                        job_id: handle.id(),
                        failure: JobFailure {
                            kind: e.kind(),
                            message: e.to_string(),
                        },
                    },
                    JobStatus::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                )
            }
        };
        self.complete(&handle, guard, event, status).await;
    }
}
