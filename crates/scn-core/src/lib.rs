//! Core domain model for SCN: jobs, runs, pages, revisions, crawl reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const CRATE_NAME: &str = "scn-core";

/// Dispatch priority carried on the wire payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    #[default]
    Normal,
    Scheduled,
}

/// How a page is expected to be fetched. Only static fetching is
/// implemented; the variant exists because the wire format carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenderMode {
    #[default]
    Static,
    Rendered,
}

/// The dispatchable unit describing one crawl request.
///
/// `id` is the idempotency key for delivery: a redelivered job with an id
/// that is already in flight (or already produced a run) is dropped.
/// Field names match the wire payload consumed by worker processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub project_id: Uuid,
    pub url: String,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(rename = "render_mode", default)]
    pub render_mode: RenderMode,
    #[serde(default)]
    pub is_scheduled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_initial_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

impl Job {
    pub fn immediate(project_id: Uuid, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            url: url.into(),
            priority: JobPriority::Normal,
            render_mode: RenderMode::Static,
            is_scheduled: false,
            run_id: None,
            is_initial_run: false,
            metadata: None,
        }
    }

    pub fn scheduled(project_id: Uuid, url: impl Into<String>) -> Self {
        Self {
            priority: JobPriority::Scheduled,
            is_scheduled: true,
            ..Self::immediate(project_id, url)
        }
    }
}

/// A job plus the absolute instant it becomes due. Lives in the scheduled
/// set until promoted into the immediate queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEntry {
    pub job: Job,
    pub due_at: DateTime<Utc>,
}

impl ScheduledEntry {
    pub fn new(job: Job, due_at: DateTime<Utc>) -> Self {
        Self { job, due_at }
    }

    /// Score used by the ordered structure (epoch milliseconds).
    pub fn due_ms(&self) -> i64 {
        self.due_at.timestamp_millis()
    }
}

/// Authoritative lifecycle state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    InProgress,
    Retrying,
    Failed,
    CompleteNoDiffs,
    CompleteWithDiffs,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Failed | RunStatus::CompleteNoDiffs | RunStatus::CompleteWithDiffs
        )
    }

    /// Terminal success. Only successful runs schedule a successor.
    pub fn is_success(self) -> bool {
        matches!(self, RunStatus::CompleteNoDiffs | RunStatus::CompleteWithDiffs)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::InProgress => "IN_PROGRESS",
            RunStatus::Retrying => "RETRYING",
            RunStatus::Failed => "FAILED",
            RunStatus::CompleteNoDiffs => "COMPLETE_NO_DIFFS",
            RunStatus::CompleteWithDiffs => "COMPLETE_WITH_DIFFS",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown run status: {0}")]
pub struct ParseRunStatusError(pub String);

impl FromStr for RunStatus {
    type Err = ParseRunStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(RunStatus::Queued),
            "IN_PROGRESS" => Ok(RunStatus::InProgress),
            "RETRYING" => Ok(RunStatus::Retrying),
            "FAILED" => Ok(RunStatus::Failed),
            "COMPLETE_NO_DIFFS" => Ok(RunStatus::CompleteNoDiffs),
            "COMPLETE_WITH_DIFFS" => Ok(RunStatus::CompleteWithDiffs),
            other => Err(ParseRunStatusError(other.to_string())),
        }
    }
}

/// Counters recorded on a terminal run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunMetrics {
    pub pages_checked: usize,
    pub pages_changed: usize,
    pub pages_new: usize,
    pub pages_unchanged: usize,
    pub pages_unreachable: usize,
    pub attempts: u32,
    pub duration_ms: u64,
}

/// One execution attempt of the crawl pipeline for a project. Created when
/// a job is accepted; mutated only by the run state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub project_id: Uuid,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub metrics: Option<RunMetrics>,
}

impl Run {
    pub fn queued(id: Uuid, project_id: Uuid) -> Self {
        Self {
            id,
            project_id,
            status: RunStatus::Queued,
            started_at: None,
            finished_at: None,
            summary: None,
            metrics: None,
        }
    }
}

/// A tracked URL. Unique per (project_id, url); `current_revision_id`
/// points at the newest revision, guarded by `last_revised_at` so a stale
/// run can never move it backwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: Uuid,
    pub project_id: Uuid,
    pub url: String,
    pub canonical_url: String,
    pub render_mode: RenderMode,
    pub is_indexable: bool,
    pub current_revision_id: Option<Uuid>,
    pub last_revised_at: Option<DateTime<Utc>>,
}

impl Page {
    pub fn new(project_id: Uuid, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: Uuid::new_v4(),
            project_id,
            canonical_url: url.clone(),
            url,
            render_mode: RenderMode::Static,
            is_indexable: true,
            current_revision_id: None,
            last_revised_at: None,
        }
    }
}

/// Append-only content snapshot of a page, one per run in which the page
/// changed. Response headers are kept so the next run's change detection
/// can short-circuit without hashing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRevision {
    pub id: Uuid,
    pub page_id: Uuid,
    pub run_id: Uuid,
    pub content: String,
    pub content_hash: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub title: String,
    pub meta_description: String,
    pub created_at: DateTime<Utc>,
}

/// A page visited during one crawl, with the metadata the artifact needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawledPage {
    pub url: String,
    pub title: String,
    pub meta_description: String,
    pub page_id: Uuid,
    pub revision_id: Option<Uuid>,
}

/// Ephemeral aggregate of one crawler execution. Unreachable pages are
/// reported as unchanged but counted separately so transient outages never
/// trigger artifact regeneration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CrawlReport {
    pub start_url: String,
    pub changed_pages: Vec<CrawledPage>,
    pub new_pages: Vec<CrawledPage>,
    pub unchanged_pages: Vec<String>,
    pub unreachable_pages: Vec<String>,
    pub external_links: Vec<String>,
    pub total_checked: usize,
}

impl CrawlReport {
    pub fn has_changes(&self) -> bool {
        !self.changed_pages.is_empty() || !self.new_pages.is_empty()
    }

    /// All pages crawled this run, start URL first when present. The
    /// artifact generator uses the leading page for the site header.
    pub fn crawled_pages(&self) -> Vec<&CrawledPage> {
        let mut pages: Vec<&CrawledPage> = self
            .new_pages
            .iter()
            .chain(self.changed_pages.iter())
            .collect();
        if let Some(idx) = pages.iter().position(|p| p.url == self.start_url) {
            pages.swap(0, idx);
        }
        pages
    }

    pub fn metrics(&self, attempts: u32, duration_ms: u64) -> RunMetrics {
        RunMetrics {
            pages_checked: self.total_checked,
            pages_changed: self.changed_pages.len(),
            pages_new: self.new_pages.len(),
            pages_unchanged: self.unchanged_pages.len(),
            pages_unreachable: self.unreachable_pages.len(),
            attempts,
            duration_ms,
        }
    }
}

/// Persisted pointer to one generated artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub run_id: Uuid,
    pub kind: String,
    pub url: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

pub const ARTIFACT_KIND_LLMS_TXT: &str = "LLMS_TXT";

/// Subscriber endpoint notified when a run produces a new artifact.
/// Endpoint CRUD lives outside the pipeline; the pipeline only reads these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub project_id: Uuid,
    pub url: String,
    pub secret: Option<String>,
    pub active: bool,
}

/// Recurring-crawl configuration for a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSchedule {
    pub project_id: Uuid,
    pub cron_expression: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}
