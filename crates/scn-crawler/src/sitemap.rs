//! Sitemap discovery used to seed the crawl frontier.
//!
//! Both plain sitemaps and sitemap indexes are handled; anything that fails
//! to fetch or parse is logged and skipped, since the sitemap is a hint and
//! never a requirement.

use scn_storage::Fetch;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

fn loc_values(xml: &str, selector: &str) -> Vec<String> {
    let document = Html::parse_document(xml);
    let sel = Selector::parse(selector).expect("static selector");
    document
        .select(&sel)
        .map(|n| n.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_sitemap_index(xml: &str) -> bool {
    xml.contains("<sitemapindex")
}

/// Fetch `/sitemap.xml` and return every page URL it lists. A sitemap index
/// is followed one level deep.
pub async fn discover_sitemap_urls(fetcher: &dyn Fetch, root_url: &Url) -> Vec<Url> {
    let Ok(sitemap_url) = root_url.join("/sitemap.xml") else {
        return Vec::new();
    };

    let body = match fetcher.fetch(&sitemap_url).await {
        Ok(page) => page.body,
        Err(err) => {
            debug!(url = %sitemap_url, error = %err, "no sitemap");
            return Vec::new();
        }
    };

    let mut urls = Vec::new();
    if is_sitemap_index(&body) {
        for sub in loc_values(&body, "sitemap > loc") {
            let Ok(sub_url) = Url::parse(&sub) else {
                warn!(loc = %sub, "skipping unparseable sub-sitemap loc");
                continue;
            };
            match fetcher.fetch(&sub_url).await {
                Ok(page) => urls.extend(loc_values(&page.body, "url > loc")),
                Err(err) => warn!(url = %sub_url, error = %err, "skipping sub-sitemap"),
            }
        }
    } else {
        urls = loc_values(&body, "url > loc");
    }

    urls.into_iter()
        .filter_map(|loc| match Url::parse(&loc) {
            Ok(url) => Some(url),
            Err(_) => {
                warn!(loc = %loc, "skipping unparseable sitemap loc");
                None
            }
        })
        .collect()
}
