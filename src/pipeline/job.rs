//! Job handles, progress reporting and the per-project job slots.
//!
//! Progress is stage-weighted and only moves when a stage really finishes:
//!
//! ```text
//! ingest 10 │ separate 35 │ transform 25 │ reconstruct 30   = 100 %
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use super::error::ErrorKind;
use super::state::ProjectId;

// ---------------------------------------------------------------------------
// JobKind / Stage
// ---------------------------------------------------------------------------

/// The two independent job branches of a project. Each has its own slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Transform,
    Lyrics,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transform => "transform",
            Self::Lyrics => "lyrics",
        })
    }
}

/// Stages of a transform job, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    Separate,
    Transform,
    Reconstruct,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Self::Ingest,
        Self::Separate,
        Self::Transform,
        Self::Reconstruct,
    ];

    /// Share of the job's progress, in percent.
    pub fn weight(&self) -> u8 {
        match self {
            Self::Ingest => 10,
            Self::Separate => 35,
            Self::Transform => 25,
            Self::Reconstruct => 30,
        }
    }

    /// Progress once this stage and every earlier one has finished.
    pub fn cumulative(&self) -> u8 {
        Self::ALL
            .iter()
            .take_while(|s| *s <= self)
            .map(Stage::weight)
            .sum()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Separate => "separate",
            Self::Transform => "transform",
            Self::Reconstruct => "reconstruct",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// JobStatus / JobSnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed { kind: ErrorKind, message: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. })
    }
}

/// Point-in-time view of a job, published through a `watch` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    /// Stage currently running (transform jobs only).
    pub stage: Option<Stage>,
    /// 0–100, never decreases.
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// JobHandle
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct JobShared {
    snapshot: watch::Sender<JobSnapshot>,
    cancel: AtomicBool,
}

/// Cheap-to-clone handle to one running or finished job.
///
/// Every clone observes the same progress; handing out clones is how
/// duplicate submissions join the job already in flight.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    project_id: ProjectId,
    kind: JobKind,
    shared: Arc<JobShared>,
}

impl JobHandle {
    pub(crate) fn new(project_id: ProjectId, kind: JobKind) -> Self {
        let (snapshot, _) = watch::channel(JobSnapshot {
            status: JobStatus::Pending,
            stage: None,
            progress: 0,
            started_at: Utc::now(),
            finished_at: None,
        });
        Self {
            id: Uuid::new_v4(),
            project_id,
            kind,
            shared: Arc::new(JobShared {
                snapshot,
                cancel: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn progress(&self) -> u8 {
        self.shared.snapshot.borrow().progress
    }

    pub fn status(&self) -> JobStatus {
        self.shared.snapshot.borrow().status.clone()
    }

    /// Receiver that wakes on every progress or status change.
    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Wait until the job reaches a terminal status.
    pub async fn wait(&self) -> JobSnapshot {
        let mut rx = self.subscribe();
        loop {
            {
                let current = rx.borrow_and_update();
                if current.status.is_terminal() {
                    return current.clone();
                }
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    pub fn cancel_requested(&self) -> bool {
        self.shared.cancel.load(Ordering::SeqCst)
    }

    pub(crate) fn request_cancel(&self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
    }

    pub(crate) fn start_stage(&self, stage: Stage) {
        self.shared.snapshot.send_modify(|s| {
            s.status = JobStatus::Running;
            s.stage = Some(stage);
        });
    }

    /// Raise progress to `progress`; lower values are ignored.
    pub(crate) fn advance(&self, progress: u8) {
        self.shared.snapshot.send_modify(|s| {
            s.status = JobStatus::Running;
            s.progress = s.progress.max(progress.min(100));
        });
    }

    pub(crate) fn finish(&self, status: JobStatus) {
        self.shared.snapshot.send_modify(|s| {
            if status == JobStatus::Succeeded {
                s.progress = 100;
            }
            s.status = status;
            s.stage = None;
            s.finished_at = Some(Utc::now());
        });
    }
}

// ---------------------------------------------------------------------------
// JobSlots
// ---------------------------------------------------------------------------

/// One slot per `(project, kind)`: the single-active-job lock.
#[derive(Debug, Default)]
pub(crate) struct JobSlots {
    active: Mutex<HashMap<(ProjectId, JobKind), JobHandle>>,
}

impl JobSlots {
    pub(crate) fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<(ProjectId, JobKind), JobHandle>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn get(&self, project_id: ProjectId, kind: JobKind) -> Option<JobHandle> {
        self.lock().get(&(project_id, kind)).cloned()
    }

    /// Free the slot if it still belongs to `job_id`.
    pub(crate) fn release(&self, project_id: ProjectId, kind: JobKind, job_id: Uuid) {
        let mut active = self.lock();
        if active
            .get(&(project_id, kind))
            .is_some_and(|h| h.id() == job_id)
        {
            active.remove(&(project_id, kind));
        }
    }
}

/// Releases a job slot when dropped, including on panic or early return.
pub(crate) struct SlotGuard {
    slots: Arc<JobSlots>,
    project_id: ProjectId,
    kind: JobKind,
    job_id: Uuid,
}

impl SlotGuard {
    pub(crate) fn new(slots: Arc<JobSlots>, handle: &JobHandle) -> Self {
        Self {
            slots,
            project_id: handle.project_id(),
            kind: handle.kind(),
            job_id: handle.id(),
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.release(self.project_id, self.kind, self.job_id);
    }
}
