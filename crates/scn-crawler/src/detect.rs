//! Two-phase per-page change decision.
//!
//! Header phase first: matching ETag or Last-Modified against the stored
//! revision settles the page without hashing. Hash phase otherwise:
//! normalize the body and compare SHA-256 digests. Fetch failures are
//! reported as unreachable, never as changed, so a transient outage cannot
//! trigger artifact regeneration.

use scn_core::PageRevision;
use scn_storage::{FetchError, FetchedPage};
use tracing::debug;

use crate::normalize::{content_hash, normalize_html};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDecision {
    /// Same content as the stored revision (or page fetch skipped by the
    /// header phase).
    Unchanged,
    /// Existing page with different content; carries the new hash.
    Changed { content_hash: String },
    /// First sighting of this URL.
    New { content_hash: String },
    /// Fetch failed; counted separately and treated as unchanged.
    Unreachable,
}

pub fn detect_change(
    prior: Option<&PageRevision>,
    fetched: Result<&FetchedPage, &FetchError>,
) -> ChangeDecision {
    let page = match fetched {
        Ok(page) => page,
        Err(err) => {
            debug!(error = %err, "page unreachable");
            return ChangeDecision::Unreachable;
        }
    };

    if let Some(prior) = prior {
        let etag_match = matches!((&prior.etag, &page.etag), (Some(a), Some(b)) if a == b);
        let last_modified_match = matches!(
            (&prior.last_modified, &page.last_modified),
            (Some(a), Some(b)) if a == b
        );
        if etag_match || last_modified_match {
            return ChangeDecision::Unchanged;
        }
    }

    let hash = content_hash(&normalize_html(&page.body));
    match prior {
        None => ChangeDecision::New { content_hash: hash },
        Some(prior) if prior.content_hash == hash => ChangeDecision::Unchanged,
        Some(_) => ChangeDecision::Changed { content_hash: hash },
    }
}
