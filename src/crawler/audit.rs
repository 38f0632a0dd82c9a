//! Reconciliation of stored reply counts with the stored reply rows.

use tracing::{error, info};

use crate::db::{count_replies_by_thread, get_original_post_reply_counts, update_reply_count, Database};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub threads_checked: usize,
    pub corrected: usize,
}

/// Set every original post's reply count to the number of replies actually stored.
///
/// Runs over all stored threads, not only the ones scraped this run. Store
/// errors are logged; the next audit picks up whatever was missed.
pub async fn audit_reply_counts(db: &Database) -> AuditReport {
    let mut report = AuditReport::default();

    let originals = match get_original_post_reply_counts(db.pool()).await {
        Ok(originals) => originals,
        Err(e) => {
            error!("Failed to list threads for reply count audit: {e:#}");
            return report;
        }
    };

    let actual_counts = match count_replies_by_thread(db.pool()).await {
        Ok(counts) => counts,
        Err(e) => {
            error!("Failed to count stored replies: {e:#}");
            return report;
        }
    };

    for original in originals {
        report.threads_checked += 1;
        let stored = original.reply_count;
        let actual = actual_counts.get(&original.thread_id).copied().unwrap_or(0);
        if stored == actual {
            continue;
        }

        match update_reply_count(db.pool(), &original.id, actual).await {
            Ok(_) => {
                info!(
                    thread_id = %original.thread_id,
                    post_id = %original.id,
                    from = stored,
                    to = actual,
                    "Corrected reply count"
                );
                report.corrected += 1;
            }
            Err(e) => {
                error!(thread_id = %original.thread_id, "Failed to correct reply count: {e:#}");
            }
        }
    }

    info!(
        threads = report.threads_checked,
        corrected = report.corrected,
        "Reply count audit complete"
    );

    report
}
