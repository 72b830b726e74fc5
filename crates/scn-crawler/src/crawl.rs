//! Breadth-first site crawl with per-page change detection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use scn_core::{CrawlReport, CrawledPage, Page, PageRevision};
use scn_storage::{BackoffPolicy, Fetch, FetchError, FetchedPage, Store, StoreError};
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::detect::{detect_change, ChangeDecision};
use crate::normalize::{extract_meta, PageMeta};
use crate::robots::RobotsPolicy;
use crate::sitemap::discover_sitemap_urls;

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub max_pages: usize,
    pub max_depth: usize,
    pub user_agent: String,
    pub robots_backoff: BackoffPolicy,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 200,
            max_depth: 2,
            user_agent: "scn-crawler/0.1 (+https://example.com)".to_string(),
            robots_backoff: BackoffPolicy::default(),
        }
    }
}

/// Run-scoped crawl failures. Page-scoped fetch errors never surface here;
/// they become unreachable entries in the report instead.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid root url {0}")]
    InvalidRootUrl(String),
    #[error("root url {url} unreachable: {source}")]
    RootUnreachable { url: String, source: FetchError },
    #[error("robots.txt disallows crawling {0}")]
    RobotsBlocksSite(String),
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

impl CrawlError {
    /// Whether retrying the whole run could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CrawlError::RootUnreachable { source, .. } => source.is_retryable(),
            CrawlError::Persistence(_) => true,
            CrawlError::InvalidRootUrl(_) | CrawlError::RobotsBlocksSite(_) => false,
        }
    }
}

pub struct Crawler {
    fetcher: Arc<dyn Fetch>,
    store: Arc<dyn Store>,
    config: CrawlConfig,
}

/// Visited-set key: scheme + host + path with the trailing slash trimmed,
/// fragments and queries dropped.
fn visit_key(url: &Url) -> String {
    let path = url.path().trim_end_matches('/');
    format!(
        "{}://{}{}",
        url.scheme(),
        url.host_str().unwrap_or_default(),
        if path.is_empty() { "/" } else { path }
    )
}

fn same_domain(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str()
}

/// Resolve an anchor href against the page URL. Non-http(s) schemes
/// (mailto:, tel:, javascript:) resolve to other schemes and are dropped.
fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let mut joined = base.join(href).ok()?;
    if joined.scheme() != "http" && joined.scheme() != "https" {
        return None;
    }
    joined.set_fragment(None);
    Some(joined)
}

fn extract_links(base: &Url, html: &str) -> Vec<Url> {
    let document = Html::parse_document(html);
    let sel = Selector::parse("a[href]").expect("static selector");
    document
        .select(&sel)
        .filter_map(|n| n.value().attr("href"))
        .filter_map(|href| resolve_link(base, href))
        .collect()
}

impl Crawler {
    pub fn new(fetcher: Arc<dyn Fetch>, store: Arc<dyn Store>, config: CrawlConfig) -> Self {
        Self {
            fetcher,
            store,
            config,
        }
    }

    /// Crawl one project from its root URL, writing revisions for changed
    /// and new pages, and return the report the run closes on.
    pub async fn crawl(
        &self,
        project_id: Uuid,
        run_id: Uuid,
        root_url: &str,
    ) -> Result<CrawlReport, CrawlError> {
        let root = Url::parse(root_url)
            .map_err(|_| CrawlError::InvalidRootUrl(root_url.to_string()))?;

        let robots = RobotsPolicy::fetch(
            self.fetcher.as_ref(),
            &root,
            &self.config.user_agent,
            self.config.robots_backoff,
        )
        .await;
        if robots.blocks_root(&root) {
            return Err(CrawlError::RobotsBlocksSite(root.to_string()));
        }

        let existing = self.store.pages_with_current_revision(project_id).await?;
        let mut known_pages: HashMap<String, scn_storage::PageWithRevision> = existing
            .into_iter()
            .filter_map(|p| {
                let url = Url::parse(&p.page.url).ok()?;
                Some((visit_key(&url), p))
            })
            .collect();

        let mut report = CrawlReport {
            start_url: root.to_string(),
            ..Default::default()
        };

        let mut frontier: VecDeque<(Url, usize)> = VecDeque::new();
        let mut enqueued: HashSet<String> = HashSet::new();
        enqueued.insert(visit_key(&root));
        frontier.push_back((root.clone(), 0));

        // Sitemap entries and already-tracked pages seed the frontier so a
        // page that lost its inbound links still gets rechecked.
        for url in discover_sitemap_urls(self.fetcher.as_ref(), &root).await {
            if same_domain(&root, &url) && enqueued.insert(visit_key(&url)) {
                frontier.push_back((url, 1));
            }
        }
        for key in known_pages.keys() {
            if let Ok(url) = Url::parse(&known_pages[key].page.url) {
                if same_domain(&root, &url) && enqueued.insert(key.clone()) {
                    frontier.push_back((url, 1));
                }
            }
        }

        let mut is_root = true;
        while let Some((url, depth)) = frontier.pop_front() {
            if report.total_checked >= self.config.max_pages {
                debug!(max_pages = self.config.max_pages, "page budget reached");
                break;
            }
            let at_root = std::mem::take(&mut is_root);

            if !robots.allows(&url) {
                // Disallowed paths are skipped entirely and do not count
                // against the page budget.
                debug!(url = %url, "skipped by robots policy");
                continue;
            }

            let fetched = self.fetcher.fetch(&url).await;
            report.total_checked += 1;

            let fetched = match fetched {
                Ok(page) => page,
                Err(source) if at_root => {
                    return Err(CrawlError::RootUnreachable {
                        url: url.to_string(),
                        source,
                    });
                }
                Err(err) => {
                    warn!(url = %url, error = %err, "page unreachable");
                    report.unreachable_pages.push(url.to_string());
                    continue;
                }
            };

            let key = visit_key(&url);
            let prior = known_pages
                .get(&key)
                .and_then(|p| p.current_revision.clone());
            let decision = detect_change(prior.as_ref(), Ok(&fetched));
            let meta = extract_meta(&fetched.body);

            match decision {
                ChangeDecision::Unchanged => {
                    report.unchanged_pages.push(url.to_string());
                }
                ChangeDecision::Unreachable => {
                    report.unreachable_pages.push(url.to_string());
                }
                ChangeDecision::New { content_hash } => {
                    let page = Page::new(project_id, url.to_string());
                    self.store.insert_page(&page).await?;
                    let revision =
                        self.save_revision(&page, run_id, &fetched, content_hash, &meta).await?;
                    report.new_pages.push(CrawledPage {
                        url: url.to_string(),
                        title: meta.title.clone(),
                        meta_description: meta.description.clone(),
                        page_id: page.id,
                        revision_id: Some(revision),
                    });
                }
                ChangeDecision::Changed { content_hash } => {
                    let page = known_pages
                        .get(&key)
                        .map(|p| p.page.clone())
                        .expect("changed decision implies a known page");
                    let revision =
                        self.save_revision(&page, run_id, &fetched, content_hash, &meta).await?;
                    report.changed_pages.push(CrawledPage {
                        url: url.to_string(),
                        title: meta.title.clone(),
                        meta_description: meta.description.clone(),
                        page_id: page.id,
                        revision_id: Some(revision),
                    });
                }
            }
            known_pages.remove(&key);

            if depth < self.config.max_depth {
                for link in extract_links(&url, &fetched.body) {
                    if !same_domain(&root, &link) {
                        report.external_links.push(link.to_string());
                        continue;
                    }
                    if enqueued.insert(visit_key(&link)) {
                        frontier.push_back((link, depth + 1));
                    }
                }
            }
        }

        info!(
            checked = report.total_checked,
            changed = report.changed_pages.len(),
            new = report.new_pages.len(),
            unchanged = report.unchanged_pages.len(),
            unreachable = report.unreachable_pages.len(),
            "crawl finished"
        );
        Ok(report)
    }

    async fn save_revision(
        &self,
        page: &Page,
        run_id: Uuid,
        fetched: &FetchedPage,
        content_hash: String,
        meta: &PageMeta,
    ) -> Result<Uuid, CrawlError> {
        let revision = PageRevision {
            id: Uuid::new_v4(),
            page_id: page.id,
            run_id,
            content: fetched.body.clone(),
            content_hash,
            etag: fetched.etag.clone(),
            last_modified: fetched.last_modified.clone(),
            title: meta.title.clone(),
            meta_description: meta.description.clone(),
            created_at: Utc::now(),
        };
        self.store.insert_revision(&revision).await?;

        let advanced = self
            .store
            .set_current_revision(page.id, revision.id, revision.created_at)
            .await?;
        if !advanced {
            warn!(page_id = %page.id, "newer run already revised page, keeping its revision");
        }
        Ok(revision.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scn_storage::MemStore;
    use std::collections::HashMap;

    struct MockFetcher {
        responses: HashMap<String, (u16, String, Option<String>)>,
    }

    impl MockFetcher {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
            }
        }

        fn page(mut self, url: &str, body: &str) -> Self {
            self.responses
                .insert(url.to_string(), (200, body.to_string(), None));
            self
        }

        fn page_with_etag(mut self, url: &str, body: &str, etag: &str) -> Self {
            self.responses
                .insert(url.to_string(), (200, body.to_string(), Some(etag.into())));
            self
        }

        fn failing(mut self, url: &str, status: u16) -> Self {
            self.responses
                .insert(url.to_string(), (status, String::new(), None));
            self
        }
    }

    #[async_trait]
    impl Fetch for MockFetcher {
        async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
            match self.responses.get(url.as_str()) {
                Some((status, body, etag)) if *status == 200 => Ok(FetchedPage {
                    status: *status,
                    etag: etag.clone(),
                    last_modified: None,
                    body: body.clone(),
                    final_url: url.to_string(),
                    fetched_at: Utc::now(),
                }),
                Some((status, _, _)) => Err(FetchError::HttpStatus {
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

    fn crawler(fetcher: MockFetcher, store: Arc<MemStore>) -> Crawler {
        Crawler::new(Arc::new(fetcher), store, CrawlConfig::default())
    }

    #[tokio::test]
    async fn first_crawl_creates_pages_and_revisions() {
        let fetcher = MockFetcher::new()
            .page(
                "https://example.com/",
                r#"<title>Home</title><a href="/a">A</a><a href="/b">B</a>"#,
            )
            .page("https://example.com/a", "<title>A</title><p>alpha</p>")
            .page("https://example.com/b", "<title>B</title><p>beta</p>");
        let store = Arc::new(MemStore::new());
        let report = crawler(fetcher, store.clone())
            .crawl(Uuid::new_v4(), Uuid::new_v4(), "https://example.com/")
            .await
            .expect("crawl");

        assert!(report.has_changes());
        assert_eq!(report.new_pages.len(), 3);
        assert_eq!(report.changed_pages.len(), 0);
        assert_eq!(store.page_count(), 3);
        assert_eq!(store.revision_count(), 3);
    }

    #[tokio::test]
    async fn recrawl_of_identical_content_reports_no_changes() {
        let build = || {
            MockFetcher::new()
                .page("https://example.com/", r#"<a href="/a">A</a><p>home</p>"#)
                .page("https://example.com/a", "<p>alpha</p>")
        };
        let store = Arc::new(MemStore::new());
        let project_id = Uuid::new_v4();

        crawler(build(), store.clone())
            .crawl(project_id, Uuid::new_v4(), "https://example.com/")
            .await
            .expect("first crawl");
        let report = crawler(build(), store.clone())
            .crawl(project_id, Uuid::new_v4(), "https://example.com/")
            .await
            .expect("second crawl");

        assert!(!report.has_changes());
        assert_eq!(report.unchanged_pages.len(), 2);
        assert_eq!(store.revision_count(), 2);
    }

    #[tokio::test]
    async fn matching_etag_counts_as_unchanged_even_when_body_differs() {
        let store = Arc::new(MemStore::new());
        let project_id = Uuid::new_v4();

        let first = MockFetcher::new().page_with_etag(
            "https://example.com/",
            "<p>v1</p>",
            "\"tag\"",
        );
        crawler(first, store.clone())
            .crawl(project_id, Uuid::new_v4(), "https://example.com/")
            .await
            .expect("first crawl");

        let second = MockFetcher::new().page_with_etag(
            "https://example.com/",
            "<p>v2 body the server lied about</p>",
            "\"tag\"",
        );
        let report = crawler(second, store.clone())
            .crawl(project_id, Uuid::new_v4(), "https://example.com/")
            .await
            .expect("second crawl");

        assert!(!report.has_changes());
        assert_eq!(store.revision_count(), 1);
    }

    #[tokio::test]
    async fn changed_page_gets_a_new_revision() {
        let store = Arc::new(MemStore::new());
        let project_id = Uuid::new_v4();

        crawler(
            MockFetcher::new().page("https://example.com/", "<p>before</p>"),
            store.clone(),
        )
        .crawl(project_id, Uuid::new_v4(), "https://example.com/")
        .await
        .expect("first crawl");

        let report = crawler(
            MockFetcher::new().page("https://example.com/", "<p>after</p>"),
            store.clone(),
        )
        .crawl(project_id, Uuid::new_v4(), "https://example.com/")
        .await
        .expect("second crawl");

        assert_eq!(report.changed_pages.len(), 1);
        assert_eq!(store.page_count(), 1);
        assert_eq!(store.revision_count(), 2);
    }

    #[tokio::test]
    async fn root_fetch_failure_is_fatal_and_writes_nothing() {
        let fetcher = MockFetcher::new().failing("https://example.com/", 500);
        let store = Arc::new(MemStore::new());
        let err = crawler(fetcher, store.clone())
            .crawl(Uuid::new_v4(), Uuid::new_v4(), "https://example.com/")
            .await
            .expect_err("root should be fatal");

        assert!(matches!(err, CrawlError::RootUnreachable { .. }));
        assert!(err.is_retryable());
        assert_eq!(store.page_count(), 0);
        assert_eq!(store.revision_count(), 0);
    }

    #[tokio::test]
    async fn robots_full_disallow_aborts_the_run() {
        let fetcher = MockFetcher::new()
            .page("https://example.com/robots.txt", "User-agent: *\nDisallow: /\n")
            .page("https://example.com/", "<p>home</p>");
        let err = crawler(fetcher, Arc::new(MemStore::new()))
            .crawl(Uuid::new_v4(), Uuid::new_v4(), "https://example.com/")
            .await
            .expect_err("robots should abort");

        assert!(matches!(err, CrawlError::RobotsBlocksSite(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn disallowed_paths_are_skipped_without_counting() {
        let fetcher = MockFetcher::new()
            .page(
                "https://example.com/robots.txt",
                "User-agent: *\nDisallow: /private/\n",
            )
            .page(
                "https://example.com/",
                r#"<a href="/private/secret">s</a><a href="/open">o</a>"#,
            )
            .page("https://example.com/open", "<p>open</p>");
        let report = crawler(fetcher, Arc::new(MemStore::new()))
            .crawl(Uuid::new_v4(), Uuid::new_v4(), "https://example.com/")
            .await
            .expect("crawl");

        assert_eq!(report.total_checked, 2);
        let urls: Vec<_> = report.new_pages.iter().map(|p| p.url.as_str()).collect();
        assert!(!urls.iter().any(|u| u.contains("/private/")));
    }

    #[tokio::test]
    async fn external_links_are_recorded_but_not_traversed() {
        let fetcher = MockFetcher::new().page(
            "https://example.com/",
            r#"<a href="https://other.org/page">x</a>"#,
        );
        let report = crawler(fetcher, Arc::new(MemStore::new()))
            .crawl(Uuid::new_v4(), Uuid::new_v4(), "https://example.com/")
            .await
            .expect("crawl");

        assert_eq!(report.external_links, vec!["https://other.org/page"]);
        assert_eq!(report.total_checked, 1);
    }

    #[tokio::test]
    async fn unreachable_page_is_counted_separately_not_changed() {
        let store = Arc::new(MemStore::new());
        let project_id = Uuid::new_v4();

        crawler(
            MockFetcher::new()
                .page("https://example.com/", r#"<a href="/a">a</a><p>home</p>"#)
                .page("https://example.com/a", "<p>alpha</p>"),
            store.clone(),
        )
        .crawl(project_id, Uuid::new_v4(), "https://example.com/")
        .await
        .expect("first crawl");

        let report = crawler(
            MockFetcher::new()
                .page("https://example.com/", r#"<a href="/a">a</a><p>home</p>"#)
                .failing("https://example.com/a", 503),
            store.clone(),
        )
        .crawl(project_id, Uuid::new_v4(), "https://example.com/")
        .await
        .expect("second crawl");

        assert!(!report.has_changes());
        assert_eq!(report.unreachable_pages, vec!["https://example.com/a"]);
        assert_eq!(store.revision_count(), 2);
    }

    #[tokio::test]
    async fn sitemap_urls_seed_the_frontier() {
        let fetcher = MockFetcher::new()
            .page(
                "https://example.com/sitemap.xml",
                r#"<urlset><url><loc>https://example.com/orphan</loc></url></urlset>"#,
            )
            .page("https://example.com/", "<p>home</p>")
            .page("https://example.com/orphan", "<p>unlinked page</p>");
        let report = crawler(fetcher, Arc::new(MemStore::new()))
            .crawl(Uuid::new_v4(), Uuid::new_v4(), "https://example.com/")
            .await
            .expect("crawl");

        assert_eq!(report.new_pages.len(), 2);
    }

    #[tokio::test]
    async fn page_budget_bounds_the_crawl() {
        let mut fetcher = MockFetcher::new().page(
            "https://example.com/",
            r#"<a href="/1">1</a><a href="/2">2</a><a href="/3">3</a>"#,
        );
        for i in 1..=3 {
            fetcher = fetcher.page(&format!("https://example.com/{i}"), "<p>page</p>");
        }
        let crawler = Crawler::new(
            Arc::new(fetcher),
            Arc::new(MemStore::new()),
            CrawlConfig {
                max_pages: 2,
                ..Default::default()
            },
        );
        let report = crawler
            .crawl(Uuid::new_v4(), Uuid::new_v4(), "https://example.com/")
            .await
            .expect("crawl");

        assert_eq!(report.total_checked, 2);
    }

    #[test]
    fn visit_keys_normalize_slashes_and_fragments() {
        let a = Url::parse("https://example.com/docs/").unwrap();
        let b = Url::parse("https://example.com/docs").unwrap();
        assert_eq!(visit_key(&a), visit_key(&b));

        let root = Url::parse("https://example.com/").unwrap();
        assert_eq!(visit_key(&root), "https://example.com/");
    }

    #[test]
    fn non_http_links_are_dropped() {
        let base = Url::parse("https://example.com/").unwrap();
        assert!(resolve_link(&base, "mailto:x@example.com").is_none());
        assert!(resolve_link(&base, "tel:+1234").is_none());
        assert!(resolve_link(&base, "javascript:void(0)").is_none());
        let ok = resolve_link(&base, "/page#section").unwrap();
        assert_eq!(ok.as_str(), "https://example.com/page");
    }
}
