//! Classification of catalog entries against the stored state.

use tracing::{debug, error, info};

use super::catalog::ThreadSummary;
use super::known::KnownIdSet;
use crate::db::{get_thread_reply_count, Database};

/// How a catalog entry compares to what is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadChange {
    /// The thread's original post has never been stored.
    New,
    /// The catalog reports more replies than the stored count.
    Updated { stored: i64, observed: i64 },
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Eligible threads dropped by the per-run cap; picked up by a later run.
    pub truncated: usize,
}

/// Result of diffing one catalog fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogDiff {
    /// Thread ids to scrape, in catalog order.
    pub worklist: Vec<String>,
    pub stats: DiffStats,
}

/// Classify a single entry given the stored reply count of its original post.
#[must_use]
pub fn classify(summary: &ThreadSummary, known: &KnownIdSet, stored_replies: i64) -> ThreadChange {
    if !known.contains(&summary.id) {
        ThreadChange::New
    } else if summary.observed_reply_count > stored_replies {
        ThreadChange::Updated {
            stored: stored_replies,
            observed: summary.observed_reply_count,
        }
    } else {
        ThreadChange::Unchanged
    }
}

/// Build the capped worklist for this run.
///
/// The worklist keeps catalog order and is truncated to `max_threads`; new and
/// updated threads are not prioritized over each other.
pub async fn diff_catalog(
    db: &Database,
    known: &KnownIdSet,
    threads: &[ThreadSummary],
    max_threads: usize,
) -> CatalogDiff {
    let mut diff = CatalogDiff::default();

    for summary in threads {
        let stored_replies = if known.contains(&summary.id) {
            stored_reply_count(db, &summary.id).await
        } else {
            0
        };

        match classify(summary, known, stored_replies) {
            ThreadChange::New => {
                info!(
                    thread_id = %summary.id,
                    replies = summary.observed_reply_count,
                    "New thread found"
                );
                diff.stats.new += 1;
                diff.worklist.push(summary.id.clone());
            }
            ThreadChange::Updated { stored, observed } => {
                info!(thread_id = %summary.id, stored, observed, "Thread updated");
                diff.stats.updated += 1;
                diff.worklist.push(summary.id.clone());
            }
            ThreadChange::Unchanged => {
                debug!(thread_id = %summary.id, "Thread unchanged");
                diff.stats.unchanged += 1;
            }
        }
    }

    if diff.worklist.len() > max_threads {
        diff.stats.truncated = diff.worklist.len() - max_threads;
        diff.worklist.truncate(max_threads);
    }

    info!(
        new = diff.stats.new,
        updated = diff.stats.updated,
        unchanged = diff.stats.unchanged,
        truncated = diff.stats.truncated,
        "Catalog diff complete"
    );

    diff
}

/// Stored reply count of a thread; read failures count as zero.
async fn stored_reply_count(db: &Database, thread_id: &str) -> i64 {
    match get_thread_reply_count(db.pool(), thread_id).await {
        Ok(count) => count.unwrap_or(0),
        Err(e) => {
            error!(thread_id = %thread_id, "Failed to read stored reply count: {e:#}");
            0
        }
    }
}
