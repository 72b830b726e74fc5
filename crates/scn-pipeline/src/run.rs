//! Run state machine and executor.
//!
//! `QUEUED -> IN_PROGRESS -> {RETRYING, FAILED, COMPLETE_NO_DIFFS,
//! COMPLETE_WITH_DIFFS}`. RETRYING returns to IN_PROGRESS until the attempt
//! budget is spent. Only a successful terminal state schedules the project's
//! next run, and only COMPLETE_WITH_DIFFS publishes an artifact and fires
//! webhooks.

use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use scn_core::{ArtifactRecord, CrawlReport, Job, Run, RunStatus, ScheduledEntry, ARTIFACT_KIND_LLMS_TXT};
use scn_crawler::{CrawlConfig, Crawler};
use scn_storage::{BackoffPolicy, StoreError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::artifact::{generate_llms_txt, ARTIFACT_FILENAME};
use crate::context::PipelineContext;
use crate::schedule::next_due;
use crate::webhook::WebhookPayload;

#[derive(Debug)]
pub enum RunOutcome {
    /// The run reached a terminal state (inspect `run.status`).
    Completed(Run),
    /// A run for this job already exists and has progressed past QUEUED;
    /// redelivery is dropped.
    Duplicate(Uuid),
}

pub struct RunExecutor {
    ctx: PipelineContext,
}

impl RunExecutor {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    fn crawler(&self) -> Crawler {
        Crawler::new(
            self.ctx.fetcher.clone(),
            self.ctx.store.clone(),
            CrawlConfig {
                max_pages: self.ctx.config.max_pages,
                max_depth: self.ctx.config.max_depth,
                user_agent: self.ctx.config.user_agent.clone(),
                robots_backoff: BackoffPolicy::default(),
            },
        )
    }

    /// Drive one job to a terminal run state. Store failures on the run row
    /// itself bubble up; everything else is folded into the run status.
    pub async fn execute(&self, job: &Job) -> Result<RunOutcome, StoreError> {
        let run_id = job.run_id.unwrap_or_else(Uuid::new_v4);

        let mut run = match self.ctx.store.get_run(run_id).await? {
            Some(existing) if existing.status != RunStatus::Queued => {
                info!(run_id = %run_id, status = %existing.status, "dropping redelivered job");
                return Ok(RunOutcome::Duplicate(run_id));
            }
            Some(existing) => existing,
            None => {
                let run = Run::queued(run_id, job.project_id);
                match self.ctx.store.create_run(&run).await {
                    Ok(()) => run,
                    Err(StoreError::Conflict(_)) => {
                        return Ok(RunOutcome::Duplicate(run_id));
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        let crawler = self.crawler();
        let started = Instant::now();
        let deadline = started + self.ctx.config.run_budget;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            run.status = RunStatus::InProgress;
            if run.started_at.is_none() {
                run.started_at = Some(Utc::now());
            }
            self.ctx.store.update_run(&run).await?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self
                    .finish_failed(run, attempts, started, "run budget exceeded".to_string())
                    .await;
            }

            let crawled = tokio::time::timeout(
                remaining,
                crawler.crawl(job.project_id, run.id, &job.url),
            )
            .await;

            match crawled {
                Ok(Ok(report)) => {
                    return self.finish_success(job, run, attempts, started, report).await;
                }
                Ok(Err(err)) if err.is_retryable() && attempts < self.ctx.config.max_attempts => {
                    warn!(run_id = %run.id, attempt = attempts, error = %err, "crawl failed, retrying");
                    run.status = RunStatus::Retrying;
                    self.ctx.store.update_run(&run).await?;
                }
                Ok(Err(err)) => {
                    return self
                        .finish_failed(run, attempts, started, err.to_string())
                        .await;
                }
                Err(_elapsed) => {
                    return self
                        .finish_failed(run, attempts, started, "run budget exceeded".to_string())
                        .await;
                }
            }
        }
    }

    async fn finish_success(
        &self,
        job: &Job,
        mut run: Run,
        attempts: u32,
        started: Instant,
        report: CrawlReport,
    ) -> Result<RunOutcome, StoreError> {
        run.status = if report.has_changes() {
            RunStatus::CompleteWithDiffs
        } else {
            RunStatus::CompleteNoDiffs
        };
        run.finished_at = Some(Utc::now());
        run.metrics = Some(report.metrics(attempts, started.elapsed().as_millis() as u64));
        run.summary = Some(format!(
            "checked {} pages: {} changed, {} new, {} unchanged, {} unreachable",
            report.total_checked,
            report.changed_pages.len(),
            report.new_pages.len(),
            report.unchanged_pages.len(),
            report.unreachable_pages.len(),
        ));
        self.ctx.store.update_run(&run).await?;
        info!(run_id = %run.id, status = %run.status, "run finished");

        if run.status == RunStatus::CompleteWithDiffs {
            if let Err(err) = self.publish_artifact(job, &run, &report).await {
                warn!(run_id = %run.id, error = %err, "artifact publication failed");
            }
        }
        if job.is_scheduled {
            self.schedule_next(job).await;
        }
        Ok(RunOutcome::Completed(run))
    }

    async fn finish_failed(
        &self,
        mut run: Run,
        attempts: u32,
        started: Instant,
        summary: String,
    ) -> Result<RunOutcome, StoreError> {
        warn!(run_id = %run.id, attempts, summary = %summary, "run failed");
        run.status = RunStatus::Failed;
        run.finished_at = Some(Utc::now());
        run.summary = Some(summary);
        run.metrics = Some(scn_core::RunMetrics {
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        });
        self.ctx.store.update_run(&run).await?;
        Ok(RunOutcome::Completed(run))
    }

    /// Generate and store llms.txt, record the artifact row, and notify
    /// subscribers. Called only for COMPLETE_WITH_DIFFS.
    async fn publish_artifact(
        &self,
        job: &Job,
        run: &Run,
        report: &CrawlReport,
    ) -> anyhow::Result<String> {
        let body = generate_llms_txt(report);
        let stored = self
            .ctx
            .artifacts
            .store_bytes(job.project_id, run.id, ARTIFACT_FILENAME, body.as_bytes())
            .await
            .context("storing llms.txt")?;

        let url = format!(
            "{}/{}",
            self.ctx.config.artifact_base_url.trim_end_matches('/'),
            stored.relative_path.display()
        );
        let created_at = Utc::now();
        self.ctx
            .store
            .insert_artifact(&ArtifactRecord {
                id: Uuid::new_v4(),
                project_id: job.project_id,
                run_id: run.id,
                kind: ARTIFACT_KIND_LLMS_TXT.to_string(),
                url: url.clone(),
                content_hash: stored.content_hash,
                created_at,
            })
            .await
            .context("recording artifact")?;

        let endpoints = self.ctx.store.active_webhooks(job.project_id).await?;
        let payload = WebhookPayload {
            created_at,
            llms_txt_url: url.clone(),
        };
        self.ctx.notifier.notify_all(&endpoints, &payload).await;
        Ok(url)
    }

    /// Compute and enqueue the next scheduled entry after a successful run.
    /// Failures here are logged and never revert the run's success.
    async fn schedule_next(&self, job: &Job) {
        let result: anyhow::Result<()> = async {
            let Some(schedule) = self.ctx.store.project_schedule(job.project_id).await? else {
                return Ok(());
            };
            if !schedule.enabled {
                return Ok(());
            }
            let now = Utc::now();
            let due = next_due(&schedule.cron_expression, now)?;
            let next = Job::scheduled(job.project_id, &job.url);
            self.ctx
                .queue
                .schedule(ScheduledEntry::new(next, due))
                .await?;
            self.ctx
                .store
                .record_schedule_times(job.project_id, now, due)
                .await?;
            info!(project_id = %job.project_id, due_at = %due, "scheduled next run");
            Ok(())
        }
        .await;

        if let Err(err) = result {
            warn!(project_id = %job.project_id, error = %err, "scheduling next run failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scn_core::ProjectSchedule;
    use scn_storage::{Fetch, FetchError, FetchedPage, MemStore};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use url::Url;

    use crate::config::PipelineConfig;
    use crate::schedule::CRON_DAILY_2AM;

    struct MockFetcher {
        responses: HashMap<String, (u16, String)>,
        delay: Duration,
    }

    impl MockFetcher {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
                delay: Duration::ZERO,
            }
        }

        fn page(mut self, url: &str, body: &str) -> Self {
            self.responses
                .insert(url.to_string(), (200, body.to_string()));
            self
        }

        fn failing(mut self, url: &str, status: u16) -> Self {
            self.responses
                .insert(url.to_string(), (status, String::new()));
            self
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Fetch for MockFetcher {
        async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.responses.get(url.as_str()) {
                Some((200, body)) => Ok(FetchedPage {
                    status: 200,
                    etag: None,
                    last_modified: None,
                    body: body.clone(),
                    final_url: url.to_string(),
                    fetched_at: Utc::now(),
                }),
                Some((status, _)) => Err(FetchError::HttpStatus {
                    status: *status,
                    url: url.to_string(),
                }),
                None => Err(FetchError::HttpStatus {
                    status: 404,
                    url: url.to_string(),
                }),
            }
        }
    }

    fn context(store: Arc<MemStore>, fetcher: MockFetcher) -> PipelineContext {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PipelineConfig {
            artifacts_dir: dir.keep(),
            run_budget: Duration::from_secs(5),
            ..Default::default()
        };
        PipelineContext::new(config, store, Arc::new(fetcher))
    }

    fn schedule(project_id: Uuid) -> ProjectSchedule {
        ProjectSchedule {
            project_id,
            cron_expression: CRON_DAILY_2AM.to_string(),
            enabled: true,
            last_run_at: None,
            next_run_at: None,
        }
    }

    async fn completed(outcome: Result<RunOutcome, StoreError>) -> Run {
        match outcome.expect("execute") {
            RunOutcome::Completed(run) => run,
            RunOutcome::Duplicate(id) => panic!("unexpected duplicate for {id}"),
        }
    }

    #[tokio::test]
    async fn first_crawl_of_new_site_completes_with_diffs() {
        let store = Arc::new(MemStore::new());
        let fetcher = MockFetcher::new()
            .page(
                "https://example.com/",
                r#"<title>Home</title><a href="/a">A</a><a href="/b">B</a>"#,
            )
            .page("https://example.com/a", "<p>alpha</p>")
            .page("https://example.com/b", "<p>beta</p>");
        let ctx = context(store.clone(), fetcher);
        let executor = RunExecutor::new(ctx);

        let job = Job::immediate(Uuid::new_v4(), "https://example.com/");
        let run = completed(executor.execute(&job).await).await;

        assert_eq!(run.status, RunStatus::CompleteWithDiffs);
        assert!(run.started_at.is_some() && run.finished_at.is_some());
        let metrics = run.metrics.expect("metrics");
        assert_eq!(metrics.pages_new, 3);
        assert_eq!(metrics.pages_changed, 0);
        assert_eq!(store.page_count(), 3);
        assert_eq!(store.revision_count(), 3);
        assert_eq!(store.artifact_count(), 1);
    }

    #[tokio::test]
    async fn identical_recrawl_completes_no_diffs_and_still_schedules() {
        let project_id = Uuid::new_v4();
        let store = Arc::new(MemStore::new().with_schedule(schedule(project_id)));
        let build = || MockFetcher::new().page("https://example.com/", "<p>stable</p>");

        let first = RunExecutor::new(context(store.clone(), build()));
        let job = Job::scheduled(project_id, "https://example.com/");
        completed(first.execute(&job).await).await;

        let ctx = context(store.clone(), build());
        let queue = ctx.queue.clone();
        let second = RunExecutor::new(ctx);
        let rejob = Job::scheduled(project_id, "https://example.com/");
        let run = completed(second.execute(&rejob).await).await;

        assert_eq!(run.status, RunStatus::CompleteNoDiffs);
        assert_eq!(store.revision_count(), 1);
        // No artifact for a no-diff run, but the next run is still scheduled.
        assert_eq!(store.artifact_count(), 1);
        assert_eq!(queue.scheduled_len().await, 1);
    }

    #[tokio::test]
    async fn unreachable_root_retries_then_fails_without_scheduling() {
        let project_id = Uuid::new_v4();
        let store = Arc::new(MemStore::new().with_schedule(schedule(project_id)));
        let fetcher = MockFetcher::new().failing("https://example.com/", 503);
        let ctx = context(store.clone(), fetcher);
        let queue = ctx.queue.clone();
        let executor = RunExecutor::new(ctx);

        let job = Job::scheduled(project_id, "https://example.com/");
        let run = completed(executor.execute(&job).await).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.metrics.expect("metrics").attempts, 3);
        assert_eq!(store.page_count(), 0);
        assert_eq!(store.revision_count(), 0);
        assert_eq!(store.artifact_count(), 0);
        assert_eq!(queue.scheduled_len().await, 0);
    }

    #[tokio::test]
    async fn robots_full_block_fails_without_retrying() {
        let fetcher = MockFetcher::new()
            .page("https://example.com/robots.txt", "User-agent: *\nDisallow: /\n")
            .page("https://example.com/", "<p>home</p>");
        let store = Arc::new(MemStore::new());
        let executor = RunExecutor::new(context(store, fetcher));

        let job = Job::immediate(Uuid::new_v4(), "https://example.com/");
        let run = completed(executor.execute(&job).await).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.metrics.expect("metrics").attempts, 1);
    }

    #[tokio::test]
    async fn run_budget_overrun_fails_the_run() {
        let fetcher = MockFetcher::new()
            .page("https://example.com/", "<p>home</p>")
            .slow(Duration::from_millis(200));
        let store = Arc::new(MemStore::new());
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PipelineConfig {
            artifacts_dir: dir.keep(),
            run_budget: Duration::from_millis(20),
            ..Default::default()
        };
        let ctx = PipelineContext::new(config, store, Arc::new(fetcher));
        let executor = RunExecutor::new(ctx);

        let job = Job::immediate(Uuid::new_v4(), "https://example.com/");
        let run = completed(executor.execute(&job).await).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.summary.as_deref(), Some("run budget exceeded"));
    }

    #[tokio::test]
    async fn redelivered_job_with_processed_run_is_dropped() {
        let store = Arc::new(MemStore::new());
        let build = || MockFetcher::new().page("https://example.com/", "<p>home</p>");

        let mut job = Job::immediate(Uuid::new_v4(), "https://example.com/");
        job.run_id = Some(Uuid::new_v4());

        let first = RunExecutor::new(context(store.clone(), build()));
        completed(first.execute(&job).await).await;

        let second = RunExecutor::new(context(store.clone(), build()));
        let outcome = second.execute(&job).await.expect("execute");
        assert!(matches!(outcome, RunOutcome::Duplicate(id) if Some(id) == job.run_id));
        // No second run row, no extra revisions.
        assert_eq!(store.revision_count(), 1);
    }

    #[tokio::test]
    async fn manual_run_success_does_not_schedule() {
        let project_id = Uuid::new_v4();
        let store = Arc::new(MemStore::new().with_schedule(schedule(project_id)));
        let fetcher = MockFetcher::new().page("https://example.com/", "<p>home</p>");
        let ctx = context(store, fetcher);
        let queue = ctx.queue.clone();
        let executor = RunExecutor::new(ctx);

        let job = Job::immediate(project_id, "https://example.com/");
        let run = completed(executor.execute(&job).await).await;

        assert!(run.status.is_success());
        assert_eq!(queue.scheduled_len().await, 0);
    }
}
