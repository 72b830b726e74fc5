//! Site traversal and change detection.
//!
//! The crawler walks a site breadth-first from the project root, asks the
//! change detector whether each page differs from its stored revision, and
//! folds the answers into a [`CrawlReport`](scn_core::CrawlReport).

pub mod crawl;
pub mod detect;
pub mod normalize;
pub mod robots;
pub mod sitemap;

pub use crawl::{CrawlConfig, CrawlError, Crawler};
pub use detect::{detect_change, ChangeDecision};
pub use normalize::{content_hash, extract_meta, normalize_html, PageMeta};
pub use robots::RobotsPolicy;
pub use sitemap::discover_sitemap_urls;

pub const CRATE_NAME: &str = "scn-crawler";
