//! Project snapshot storage.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::StoreError;
use crate::pipeline::{Project, ProjectId};

/// Latest-snapshot store keyed by project id.
///
/// Snapshots carry a monotonically increasing `revision`; an upsert with a
/// lower revision than the stored one is ignored, so snapshots written from
/// concurrent jobs can arrive in any order.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn upsert(&self, project: &Project) -> Result<(), StoreError>;

    async fn find(&self, id: ProjectId) -> Result<Option<Project>, StoreError>;
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    projects: Mutex<HashMap<ProjectId, Project>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn upsert(&self, project: &Project) -> Result<(), StoreError> {
        let mut projects = self.projects.lock().unwrap_or_else(|p| p.into_inner());
        match projects.get(&project.id) {
            Some(existing) if existing.revision > project.revision => {
                log::debug!(
                    "store: ignoring stale snapshot of {} (rev {} < {})",
                    project.id,
                    project.revision,
                    existing.revision
                );
            }
            _ => {
                projects.insert(project.id, project.clone());
            }
        }
        Ok(())
    }

    async fn find(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        Ok(self
            .projects
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::{fold, ProjectEvent};
    use crate::transform::StylePreset;
    use chrono::Utc;
    use uuid::Uuid;

    fn created(id: ProjectId) -> ProjectEvent {
        ProjectEvent::Created {
            at: Utc::now(),
            id,
            name: "demo".into(),
            style: StylePreset::Trap,
        }
    }

    #[tokio::test]
    async fn stale_revision_does_not_overwrite() {
        let store = MemoryMetadataStore::new();
        let id = Uuid::new_v4();

        let mut newer = fold(id, &[created(id)]).unwrap();
        newer.revision = 5;
        newer.name = "newer".into();
        let mut older = newer.clone();
        older.revision = 3;
        older.name = "older".into();

        store.upsert(&newer).await.unwrap();
        store.upsert(&older).await.unwrap();

        assert_eq!(store.find(id).await.unwrap().unwrap().name, "newer");
    }

    #[tokio::test]
    async fn unknown_id_is_none() {
        let store = MemoryMetadataStore::new();
        assert!(store.find(Uuid::new_v4()).await.unwrap().is_none());
    }
}
