//! Injected handles shared by the scheduler, dispatcher, and run executor.
//!
//! Everything stateful lives behind this context rather than in process-wide
//! singletons, so tests build isolated instances with mock fetchers and the
//! in-memory store.

use std::sync::Arc;

use anyhow::Context;
use scn_storage::{ArtifactStore, Fetch, FetcherConfig, HttpFetcher, MemStore, PgStore, Store};

use crate::config::PipelineConfig;
use crate::queue::JobQueue;
use crate::webhook::WebhookNotifier;

#[derive(Clone)]
pub struct PipelineContext {
    pub config: PipelineConfig,
    pub store: Arc<dyn Store>,
    pub fetcher: Arc<dyn Fetch>,
    pub queue: Arc<JobQueue>,
    pub artifacts: Arc<ArtifactStore>,
    pub notifier: WebhookNotifier,
}

impl PipelineContext {
    /// Build a context with explicit handles. Tests use this with mocks.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn Store>,
        fetcher: Arc<dyn Fetch>,
    ) -> Self {
        let artifacts = Arc::new(ArtifactStore::new(config.artifacts_dir.clone()));
        let notifier = WebhookNotifier::new(reqwest::Client::new());
        Self {
            config,
            store,
            fetcher,
            queue: Arc::new(JobQueue::new()),
            artifacts,
            notifier,
        }
    }

    /// Wire up production handles from config: Postgres when a database URL
    /// is configured, the in-memory store otherwise.
    pub async fn connect(config: PipelineConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn Store> = match &config.database_url {
            Some(url) => Arc::new(
                PgStore::connect(url)
                    .await
                    .context("connecting to database")?,
            ),
            None => Arc::new(MemStore::new()),
        };
        let fetcher = Arc::new(
            HttpFetcher::new(FetcherConfig {
                timeout: config.http_timeout,
                user_agent: config.user_agent.clone(),
                per_host_delay: config.per_host_delay,
            })
            .context("building http fetcher")?,
        );
        Ok(Self::new(config, store, fetcher))
    }
}
