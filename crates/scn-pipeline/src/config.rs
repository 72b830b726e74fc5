//! Pipeline configuration, read from the environment in binaries and built
//! directly in tests.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Postgres connection string; absent means the in-memory store.
    pub database_url: Option<String>,
    pub artifacts_dir: PathBuf,
    /// Public base URL under which stored artifacts are served.
    pub artifact_base_url: String,
    pub user_agent: String,
    pub http_timeout: Duration,
    pub per_host_delay: Duration,
    pub max_pages: usize,
    pub max_depth: usize,
    pub promoter_tick: Duration,
    /// Wall-clock budget for one run; exceeding it fails the run.
    pub run_budget: Duration,
    pub max_attempts: u32,
    pub bind_addr: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            artifacts_dir: PathBuf::from("./artifacts"),
            artifact_base_url: "http://localhost:8080/artifacts".to_string(),
            user_agent: "scn-crawler/0.1 (+https://example.com)".to_string(),
            http_timeout: Duration::from_secs(15),
            per_host_delay: Duration::from_millis(500),
            max_pages: 200,
            max_depth: 2,
            promoter_tick: Duration::from_secs(30),
            run_budget: Duration::from_secs(600),
            max_attempts: 3,
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            artifacts_dir: std::env::var("ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifacts_dir),
            artifact_base_url: std::env::var("ARTIFACT_BASE_URL")
                .unwrap_or(defaults.artifact_base_url),
            user_agent: std::env::var("SCN_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout: Duration::from_secs(env_parse("SCN_HTTP_TIMEOUT_SECS", 15)),
            per_host_delay: Duration::from_millis(env_parse("CRAWL_DELAY_MS", 500)),
            max_pages: env_parse("CRAWL_MAX_PAGES", defaults.max_pages),
            max_depth: env_parse("CRAWL_MAX_DEPTH", defaults.max_depth),
            promoter_tick: Duration::from_secs(env_parse("SCN_PROMOTER_TICK_SECS", 30)),
            run_budget: Duration::from_secs(env_parse("SCN_RUN_BUDGET_SECS", 600)),
            max_attempts: env_parse("SCN_MAX_ATTEMPTS", defaults.max_attempts),
            bind_addr: std::env::var("SCN_BIND_ADDR").unwrap_or(defaults.bind_addr),
        }
    }
}
