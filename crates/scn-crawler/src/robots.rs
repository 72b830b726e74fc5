//! robots.txt fetching and matching.

use robotstxt::DefaultMatcher;
use scn_storage::{BackoffPolicy, Fetch};
use tracing::{debug, warn};
use url::Url;

/// Parsed robots policy for one host. A missing or unreadable robots.txt
/// allows everything, matching how well-behaved crawlers treat a 404.
#[derive(Debug, Clone)]
pub struct RobotsPolicy {
    body: String,
    user_agent: String,
}

impl RobotsPolicy {
    pub fn allow_all(user_agent: impl Into<String>) -> Self {
        Self {
            body: String::new(),
            user_agent: user_agent.into(),
        }
    }

    pub fn from_body(body: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Fetch `/robots.txt` for the root URL's host, retrying transient
    /// failures per the backoff policy. Terminal failures (404 and friends)
    /// degrade to allow-all rather than aborting the crawl.
    pub async fn fetch(
        fetcher: &dyn Fetch,
        root_url: &Url,
        user_agent: &str,
        backoff: BackoffPolicy,
    ) -> Self {
        let Ok(robots_url) = root_url.join("/robots.txt") else {
            return Self::allow_all(user_agent);
        };

        let mut attempt = 0;
        loop {
            match fetcher.fetch(&robots_url).await {
                Ok(page) => {
                    debug!(url = %robots_url, "fetched robots.txt");
                    return Self::from_body(page.body, user_agent);
                }
                Err(err) if err.is_retryable() && attempt < backoff.max_retries => {
                    let delay = backoff.delay_for_attempt(attempt);
                    warn!(url = %robots_url, attempt, error = %err, "retrying robots fetch");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!(url = %robots_url, error = %err, "no robots.txt, allowing all");
                    return Self::allow_all(user_agent);
                }
            }
        }
    }

    pub fn allows(&self, url: &Url) -> bool {
        if self.body.is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.body, &self.user_agent, url.as_str())
    }

    /// True when even the site root is disallowed, which makes the whole
    /// crawl pointless.
    pub fn blocks_root(&self, root_url: &Url) -> bool {
        !self.allows(root_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn empty_policy_allows_everything() {
        let policy = RobotsPolicy::allow_all("scn-crawler");
        assert!(policy.allows(&url("https://example.com/any/path")));
        assert!(!policy.blocks_root(&url("https://example.com/")));
    }

    #[test]
    fn disallowed_prefixes_are_blocked_for_wildcard_agent() {
        let policy = RobotsPolicy::from_body(
            "User-agent: *\nDisallow: /private/\n",
            "scn-crawler",
        );
        assert!(!policy.allows(&url("https://example.com/private/page")));
        assert!(policy.allows(&url("https://example.com/public")));
    }

    #[test]
    fn full_site_disallow_blocks_root() {
        let policy = RobotsPolicy::from_body("User-agent: *\nDisallow: /\n", "scn-crawler");
        assert!(policy.blocks_root(&url("https://example.com/")));
    }
}
