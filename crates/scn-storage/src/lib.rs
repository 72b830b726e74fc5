//! HTTP fetching, persistence, and immutable artifact storage for SCN.

pub mod artifact;
pub mod fetch;
pub mod postgres;
pub mod store;

pub use artifact::{ArtifactStore, StoredArtifact};
pub use fetch::{
    classify_status, BackoffPolicy, Fetch, FetchError, FetchedPage, FetcherConfig, HttpFetcher,
    RetryDisposition,
};
pub use postgres::PgStore;
pub use store::{MemStore, PageWithRevision, Store, StoreError};

pub const CRATE_NAME: &str = "scn-storage";
