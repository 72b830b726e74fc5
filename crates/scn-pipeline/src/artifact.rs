//! llms.txt generation from a crawl report.
//!
//! Format: `# <site title>`, a `> description` blockquote, then a `## Pages`
//! list of `- [title](url): description` lines. The leading page (the start
//! URL when it was crawled) supplies the header.

use scn_core::CrawlReport;

pub const ARTIFACT_FILENAME: &str = "llms.txt";

pub fn generate_llms_txt(report: &CrawlReport) -> String {
    let pages = report.crawled_pages();
    let start_page = pages.first();

    let site_title = start_page
        .map(|p| p.title.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            url::Url::parse(&report.start_url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| report.start_url.clone())
        });

    let site_description = start_page
        .map(|p| p.meta_description.trim())
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Website content from {}", report.start_url));

    let mut lines = vec![
        format!("# {site_title}"),
        String::new(),
        format!("> {site_description}"),
        String::new(),
        "## Pages".to_string(),
        String::new(),
    ];

    for page in pages {
        if page.url.is_empty() {
            continue;
        }
        let title = page.title.trim();
        let link_title = if title.is_empty() { &page.url } else { title };
        let description = page.meta_description.trim();
        if description.is_empty() {
            lines.push(format!("- [{link_title}]({})", page.url));
        } else {
            lines.push(format!("- [{link_title}]({}): {description}", page.url));
        }
    }

    lines.join("\n")
}
