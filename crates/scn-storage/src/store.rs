//! Persistence seam for pages, revisions, runs, artifacts, and schedules.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scn_core::{ArtifactRecord, Page, PageRevision, ProjectSchedule, Run, WebhookEndpoint};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Conflict(String),
}

/// A page joined with its authoritative revision, as change detection
/// consumes it.
#[derive(Debug, Clone)]
pub struct PageWithRevision {
    pub page: Page,
    pub current_revision: Option<PageRevision>,
}

/// Durable state behind the pipeline. The crawler owns page/revision writes
/// during its run; the run state machine owns run rows.
#[async_trait]
pub trait Store: Send + Sync {
    async fn pages_with_current_revision(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<PageWithRevision>, StoreError>;

    async fn insert_page(&self, page: &Page) -> Result<(), StoreError>;

    /// Append-only revision insert.
    async fn insert_revision(&self, revision: &PageRevision) -> Result<(), StoreError>;

    /// Point the page at a new authoritative revision. Returns false when
    /// the update was refused because a newer run already revised the page.
    async fn set_current_revision(
        &self,
        page_id: Uuid,
        revision_id: Uuid,
        revised_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn create_run(&self, run: &Run) -> Result<(), StoreError>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError>;

    async fn update_run(&self, run: &Run) -> Result<(), StoreError>;

    async fn insert_artifact(&self, artifact: &ArtifactRecord) -> Result<(), StoreError>;

    async fn latest_artifact_url(&self, project_id: Uuid) -> Result<Option<String>, StoreError>;

    async fn active_webhooks(&self, project_id: Uuid)
        -> Result<Vec<WebhookEndpoint>, StoreError>;

    async fn project_schedule(
        &self,
        project_id: Uuid,
    ) -> Result<Option<ProjectSchedule>, StoreError>;

    async fn record_schedule_times(
        &self,
        project_id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// In-memory store used by tests and one-shot CLI crawls.
#[derive(Debug, Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
}

#[derive(Debug, Default)]
struct MemInner {
    pages: HashMap<Uuid, Page>,
    revisions: HashMap<Uuid, PageRevision>,
    runs: HashMap<Uuid, Run>,
    artifacts: Vec<ArtifactRecord>,
    webhooks: Vec<WebhookEndpoint>,
    schedules: HashMap<Uuid, ProjectSchedule>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_webhooks(self, webhooks: Vec<WebhookEndpoint>) -> Self {
        self.inner.lock().unwrap().webhooks = webhooks;
        self
    }

    pub fn with_schedule(self, schedule: ProjectSchedule) -> Self {
        self.inner
            .lock()
            .unwrap()
            .schedules
            .insert(schedule.project_id, schedule);
        self
    }

    pub fn page_count(&self) -> usize {
        self.inner.lock().unwrap().pages.len()
    }

    pub fn revision_count(&self) -> usize {
        self.inner.lock().unwrap().revisions.len()
    }

    pub fn artifact_count(&self) -> usize {
        self.inner.lock().unwrap().artifacts.len()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn pages_with_current_revision(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<PageWithRevision>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .pages
            .values()
            .filter(|p| p.project_id == project_id)
            .map(|page| PageWithRevision {
                current_revision: page
                    .current_revision_id
                    .and_then(|id| inner.revisions.get(&id).cloned()),
                page: page.clone(),
            })
            .collect())
    }

    async fn insert_page(&self, page: &Page) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .pages
            .values()
            .any(|p| p.project_id == page.project_id && p.url == page.url)
        {
            return Err(StoreError::Conflict(format!(
                "page already exists for {}",
                page.url
            )));
        }
        inner.pages.insert(page.id, page.clone());
        Ok(())
    }

    async fn insert_revision(&self, revision: &PageRevision) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.revisions.insert(revision.id, revision.clone());
        Ok(())
    }

    async fn set_current_revision(
        &self,
        page_id: Uuid,
        revision_id: Uuid,
        revised_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(page) = inner.pages.get_mut(&page_id) else {
            return Ok(false);
        };
        if page.last_revised_at.is_some_and(|at| at > revised_at) {
            return Ok(false);
        }
        page.current_revision_id = Some(revision_id);
        page.last_revised_at = Some(revised_at);
        Ok(true)
    }

    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.runs.contains_key(&run.id) {
            return Err(StoreError::Conflict(format!("run {} already exists", run.id)));
        }
        inner.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        Ok(self.inner.lock().unwrap().runs.get(&run_id).cloned())
    }

    async fn update_run(&self, run: &Run) -> Result<(), StoreError> {
        self.inner.lock().unwrap().runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn insert_artifact(&self, artifact: &ArtifactRecord) -> Result<(), StoreError> {
        self.inner.lock().unwrap().artifacts.push(artifact.clone());
        Ok(())
    }

    async fn latest_artifact_url(&self, project_id: Uuid) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .artifacts
            .iter()
            .filter(|a| a.project_id == project_id)
            .max_by_key(|a| a.created_at)
            .map(|a| a.url.clone()))
    }

    async fn active_webhooks(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<WebhookEndpoint>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .webhooks
            .iter()
            .filter(|w| w.project_id == project_id && w.active)
            .cloned()
            .collect())
    }

    async fn project_schedule(
        &self,
        project_id: Uuid,
    ) -> Result<Option<ProjectSchedule>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .schedules
            .get(&project_id)
            .cloned())
    }

    async fn record_schedule_times(
        &self,
        project_id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(schedule) = inner.schedules.get_mut(&project_id) {
            schedule.last_run_at = Some(last_run_at);
            schedule.next_run_at = Some(next_run_at);
        }
        Ok(())
    }
}
