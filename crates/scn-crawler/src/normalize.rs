//! Canonical text extraction for content hashing.
//!
//! Two fetches of a genuinely unchanged page must hash identically, so
//! everything volatile is stripped before hashing: script/style markup,
//! timestamp-like strings, and whitespace differences.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};

lazy_static! {
    static ref NON_CONTENT_TAGS: Vec<Regex> = ["script", "style", "noscript", "iframe"]
        .iter()
        .map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).unwrap())
        .collect();
    static ref HTML_COMMENTS: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
    static ref VOLATILE_PATTERNS: Vec<Regex> = vec![
        // ISO 8601 and common date formats
        Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?")
            .unwrap(),
        Regex::new(r"\d{1,2}/\d{1,2}/\d{4}").unwrap(),
        Regex::new(r"\d{4}/\d{1,2}/\d{1,2}").unwrap(),
        Regex::new(r"\d{1,2}-\d{1,2}-\d{4}").unwrap(),
        // Clock times
        Regex::new(r"\d{1,2}:\d{2}(?::\d{2})?(?:\.\d+)?").unwrap(),
        // Relative times
        Regex::new(r"(?i)\d+\s+(?:seconds?|minutes?|hours?|days?|weeks?|months?|years?)\s+ago")
            .unwrap(),
        Regex::new(r"(?i)(?:just now|a moment ago|yesterday|today|tomorrow)").unwrap(),
        // Bare unix timestamps
        Regex::new(r"\b\d{10}\b").unwrap(),
        // Server-injected chrome
        Regex::new(r"(?i)page\s+load\s+time:\s*[\d.]+ms").unwrap(),
        Regex::new(r"(?i)generated\s+at:\s*[\d\-\s:]+").unwrap(),
        Regex::new(r"(?i)last\s+modified:\s*[\d\-\s:]+").unwrap(),
        Regex::new(r"(?i)version:\s*[\d.]+").unwrap(),
    ];
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Reduce raw HTML to the canonical text used for change hashing. Pure and
/// deterministic: `normalize_html(x) == normalize_html(x)` always.
pub fn normalize_html(raw_html: &str) -> String {
    let mut without_markup = HTML_COMMENTS.replace_all(raw_html, " ").into_owned();
    for pattern in NON_CONTENT_TAGS.iter() {
        without_markup = pattern.replace_all(&without_markup, " ").into_owned();
    }

    let document = Html::parse_document(&without_markup);
    let mut text = document
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ");

    for pattern in VOLATILE_PATTERNS.iter() {
        text = pattern.replace_all(&text, " ").into_owned();
    }

    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// SHA-256 over the canonical text, hex-encoded.
pub fn content_hash(canonical_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_text.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMeta {
    pub title: String,
    pub description: String,
}

/// Pull the title and meta description the artifact generator needs.
pub fn extract_meta(raw_html: &str) -> PageMeta {
    let document = Html::parse_document(raw_html);

    let title_sel = Selector::parse("title").expect("static selector");
    let title = document
        .select(&title_sel)
        .next()
        .map(|n| n.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let desc_sel = Selector::parse(r#"meta[name="description"]"#).expect("static selector");
    let description = document
        .select(&desc_sel)
        .next()
        .and_then(|n| n.value().attr("content"))
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    PageMeta { title, description }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_and_styles_do_not_affect_canonical_text() {
        let a = "<html><body><p>Hello world</p><script>var x = 1;</script></body></html>";
        let b = "<html><body><p>Hello world</p><script>var x = 2;</script>\
                 <style>p { color: red }</style></body></html>";
        assert_eq!(normalize_html(a), normalize_html(b));
        assert_eq!(normalize_html(a), "Hello world");
    }

    #[test]
    fn volatile_timestamps_are_stripped() {
        let a = "<p>Report</p><p>Generated at: 2026-08-30 01:02:03</p>";
        let b = "<p>Report</p><p>Generated at: 2026-08-31 09:08:07</p>";
        assert_eq!(normalize_html(a), normalize_html(b));
    }

    #[test]
    fn whitespace_differences_hash_identically() {
        let a = "<p>one   two\n\nthree</p>";
        let b = "<p>one two three</p>";
        assert_eq!(content_hash(&normalize_html(a)), content_hash(&normalize_html(b)));
    }

    #[test]
    fn real_content_changes_produce_different_hashes() {
        let a = normalize_html("<p>price: 10 dollars</p>");
        let b = normalize_html("<p>price: 12 dollars</p>");
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn meta_extraction_reads_title_and_description() {
        let html = r#"<html><head><title> Docs </title>
            <meta name="description" content="All the docs."></head>
            <body></body></html>"#;
        let meta = extract_meta(html);
        assert_eq!(meta.title, "Docs");
        assert_eq!(meta.description, "All the docs.");
    }

    #[test]
    fn missing_meta_yields_empty_fields() {
        let meta = extract_meta("<html><body><p>bare</p></body></html>");
        assert_eq!(meta, PageMeta::default());
    }
}
