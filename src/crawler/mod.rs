//! Incremental crawl of the board.

mod audit;
mod catalog;
mod differ;
mod known;
mod pipeline;
mod politeness;
mod thread;

pub use audit::{audit_reply_counts, AuditReport};
pub use catalog::{fetch_catalog, parse_catalog, ThreadSummary};
pub use differ::{classify, diff_catalog, CatalogDiff, DiffStats, ThreadChange};
pub use known::KnownIdSet;
pub use pipeline::{CrawlSummary, Crawler};
pub use politeness::{build_client, PoliteFetcher};
pub use thread::{
    parse_thread, scrape_thread, ExtractedPost, OriginalStatus, ParsedThread, ThreadOutcome,
};
