//! Postgres-backed [`Store`].
//!
//! Queries are built at runtime with `sqlx::query` + `try_get` so the crate
//! compiles without a live database; the schema is embedded and applied
//! idempotently at startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scn_core::{
    ArtifactRecord, Page, PageRevision, ProjectSchedule, RenderMode, Run, RunStatus,
    WebhookEndpoint,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::{PageWithRevision, Store, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pages (
  id UUID PRIMARY KEY,
  project_id UUID NOT NULL,
  url TEXT NOT NULL,
  canonical_url TEXT NOT NULL,
  render_mode TEXT NOT NULL DEFAULT 'STATIC',
  is_indexable BOOLEAN NOT NULL DEFAULT TRUE,
  current_revision_id UUID,
  last_revised_at TIMESTAMPTZ,
  UNIQUE (project_id, url)
);

CREATE TABLE IF NOT EXISTS page_revisions (
  id UUID PRIMARY KEY,
  page_id UUID NOT NULL REFERENCES pages(id),
  run_id UUID NOT NULL,
  content TEXT NOT NULL,
  content_hash TEXT NOT NULL,
  etag TEXT,
  last_modified TEXT,
  title TEXT NOT NULL DEFAULT '',
  meta_description TEXT NOT NULL DEFAULT '',
  created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
  id UUID PRIMARY KEY,
  project_id UUID NOT NULL,
  status TEXT NOT NULL,
  started_at TIMESTAMPTZ,
  finished_at TIMESTAMPTZ,
  summary TEXT,
  metrics JSONB
);

CREATE TABLE IF NOT EXISTS artifacts (
  id UUID PRIMARY KEY,
  project_id UUID NOT NULL,
  run_id UUID NOT NULL,
  kind TEXT NOT NULL,
  url TEXT NOT NULL,
  content_hash TEXT NOT NULL,
  created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS webhooks (
  id UUID PRIMARY KEY,
  project_id UUID NOT NULL,
  url TEXT NOT NULL,
  secret TEXT,
  active BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS project_schedules (
  project_id UUID PRIMARY KEY,
  cron_expression TEXT NOT NULL,
  enabled BOOLEAN NOT NULL DEFAULT TRUE,
  last_run_at TIMESTAMPTZ,
  next_run_at TIMESTAMPTZ
);
"#;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        let store = Self { pool };
        store.apply_schema().await?;
        Ok(store)
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn apply_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn page_from_row(row: &PgRow) -> Result<Page, sqlx::Error> {
    let render_mode: String = row.try_get("render_mode")?;
    Ok(Page {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        url: row.try_get("url")?,
        canonical_url: row.try_get("canonical_url")?,
        render_mode: if render_mode == "RENDERED" {
            RenderMode::Rendered
        } else {
            RenderMode::Static
        },
        is_indexable: row.try_get("is_indexable")?,
        current_revision_id: row.try_get("current_revision_id")?,
        last_revised_at: row.try_get("last_revised_at")?,
    })
}

fn revision_from_row(row: &PgRow, prefix: &str) -> Result<Option<PageRevision>, sqlx::Error> {
    let col = |name: &str| format!("{prefix}{name}");
    let id: Option<Uuid> = row.try_get(col("id").as_str())?;
    let Some(id) = id else {
        return Ok(None);
    };
    Ok(Some(PageRevision {
        id,
        page_id: row.try_get(col("page_id").as_str())?,
        run_id: row.try_get(col("run_id").as_str())?,
        content: row.try_get(col("content").as_str())?,
        content_hash: row.try_get(col("content_hash").as_str())?,
        etag: row.try_get(col("etag").as_str())?,
        last_modified: row.try_get(col("last_modified").as_str())?,
        title: row.try_get(col("title").as_str())?,
        meta_description: row.try_get(col("meta_description").as_str())?,
        created_at: row.try_get(col("created_at").as_str())?,
    }))
}

fn run_from_row(row: &PgRow) -> Result<Run, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let metrics: Option<serde_json::Value> = row.try_get("metrics")?;
    Ok(Run {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        status: status
            .parse::<RunStatus>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        summary: row.try_get("summary")?,
        metrics: metrics.and_then(|v| serde_json::from_value(v).ok()),
    })
}

#[async_trait]
impl Store for PgStore {
    async fn pages_with_current_revision(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<PageWithRevision>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.project_id, p.url, p.canonical_url, p.render_mode,
                   p.is_indexable, p.current_revision_id, p.last_revised_at,
                   r.id AS rev_id, r.page_id AS rev_page_id, r.run_id AS rev_run_id,
                   r.content AS rev_content, r.content_hash AS rev_content_hash,
                   r.etag AS rev_etag, r.last_modified AS rev_last_modified,
                   r.title AS rev_title, r.meta_description AS rev_meta_description,
                   r.created_at AS rev_created_at
              FROM pages p
              LEFT JOIN page_revisions r ON r.id = p.current_revision_id
             WHERE p.project_id = $1
             ORDER BY p.url
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(PageWithRevision {
                page: page_from_row(&row)?,
                current_revision: revision_from_row(&row, "rev_")?,
            });
        }
        Ok(out)
    }

    async fn insert_page(&self, page: &Page) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO pages (id, project_id, url, canonical_url, render_mode,
                               is_indexable, current_revision_id, last_revised_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(page.id)
        .bind(page.project_id)
        .bind(&page.url)
        .bind(&page.canonical_url)
        .bind(match page.render_mode {
            RenderMode::Static => "STATIC",
            RenderMode::Rendered => "RENDERED",
        })
        .bind(page.is_indexable)
        .bind(page.current_revision_id)
        .bind(page.last_revised_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_revision(&self, revision: &PageRevision) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO page_revisions (id, page_id, run_id, content, content_hash,
                                        etag, last_modified, title, meta_description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(revision.id)
        .bind(revision.page_id)
        .bind(revision.run_id)
        .bind(&revision.content)
        .bind(&revision.content_hash)
        .bind(&revision.etag)
        .bind(&revision.last_modified)
        .bind(&revision.title)
        .bind(&revision.meta_description)
        .bind(revision.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_current_revision(
        &self,
        page_id: Uuid,
        revision_id: Uuid,
        revised_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE pages
               SET current_revision_id = $2,
                   last_revised_at = $3
             WHERE id = $1
               AND (last_revised_at IS NULL OR last_revised_at <= $3)
            "#,
        )
        .bind(page_id)
        .bind(revision_id)
        .bind(revised_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO runs (id, project_id, status, started_at, finished_at, summary, metrics)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(run.id)
        .bind(run.project_id)
        .bind(run.status.as_str())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.summary)
        .bind(run.metrics.map(|m| serde_json::json!(m)))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, project_id, status, started_at, finished_at, summary, metrics
              FROM runs
             WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| run_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn update_run(&self, run: &Run) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE runs
               SET status = $2,
                   started_at = $3,
                   finished_at = $4,
                   summary = $5,
                   metrics = $6
             WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(run.status.as_str())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.summary)
        .bind(run.metrics.map(|m| serde_json::json!(m)))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_artifact(&self, artifact: &ArtifactRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO artifacts (id, project_id, run_id, kind, url, content_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(artifact.id)
        .bind(artifact.project_id)
        .bind(artifact.run_id)
        .bind(&artifact.kind)
        .bind(&artifact.url)
        .bind(&artifact.content_hash)
        .bind(artifact.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_artifact_url(&self, project_id: Uuid) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT url
              FROM artifacts
             WHERE project_id = $1
             ORDER BY created_at DESC
             LIMIT 1
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.try_get("url")).transpose()?)
    }

    async fn active_webhooks(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<WebhookEndpoint>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, url, secret, active
              FROM webhooks
             WHERE project_id = $1
               AND active
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(WebhookEndpoint {
                id: row.try_get("id")?,
                project_id: row.try_get("project_id")?,
                url: row.try_get("url")?,
                secret: row.try_get("secret")?,
                active: row.try_get("active")?,
            });
        }
        Ok(out)
    }

    async fn project_schedule(
        &self,
        project_id: Uuid,
    ) -> Result<Option<ProjectSchedule>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT project_id, cron_expression, enabled, last_run_at, next_run_at
              FROM project_schedules
             WHERE project_id = $1
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ProjectSchedule {
                project_id: row.try_get("project_id")?,
                cron_expression: row.try_get("cron_expression")?,
                enabled: row.try_get("enabled")?,
                last_run_at: row.try_get("last_run_at")?,
                next_run_at: row.try_get("next_run_at")?,
            })
        })
        .transpose()
        .map_err(StoreError::Database)
    }

    async fn record_schedule_times(
        &self,
        project_id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE project_schedules
               SET last_run_at = $2,
                   next_run_at = $3
             WHERE project_id = $1
            "#,
        )
        .bind(project_id)
        .bind(last_run_at)
        .bind(next_run_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
