use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::audit::{audit_reply_counts, AuditReport};
use super::catalog::fetch_catalog;
use super::differ::{diff_catalog, DiffStats};
use super::known::KnownIdSet;
use super::politeness::{build_client, PoliteFetcher};
use super::thread::scrape_thread;
use crate::config::Config;
use crate::db::Database;

/// Counts reported at the end of a crawl run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub diff: DiffStats,
    pub threads_scraped: usize,
    pub threads_failed: usize,
    pub posts_stored: usize,
    pub store_failures: usize,
    pub reply_counts_refreshed: usize,
    pub audit: AuditReport,
    pub elapsed: Duration,
}

/// Runs the incremental crawl: catalog, diff, per-thread scrape, audit.
#[derive(Debug, Clone)]
pub struct Crawler {
    config: Config,
    db: Database,
    fetcher: PoliteFetcher,
    run_lock: Arc<Mutex<()>>,
}

impl Crawler {
    /// Create a crawler with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: Config, db: Database) -> Result<Self> {
        let client = build_client(&config.user_agent, config.request_timeout)?;
        Ok(Self::with_client(config, db, client))
    }

    #[must_use]
    pub fn with_client(config: Config, db: Database, client: reqwest::Client) -> Self {
        Self {
            config,
            db,
            fetcher: PoliteFetcher::new(client),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Run a crawl unless another run of this crawler is in flight.
    ///
    /// Returns `Ok(None)` when the run was skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the run aborts (see [`Crawler::run`]).
    pub async fn run_exclusive(&self) -> Result<Option<CrawlSummary>> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("A crawl is already running, skipping this one");
            return Ok(None);
        };
        self.run().await.map(Some)
    }

    /// Entry point for scheduled jobs: run exclusively and log the outcome.
    pub async fn run_job(&self) {
        if let Err(e) = self.run_exclusive().await {
            error!("Crawl aborted: {e:#}");
        }
    }

    /// Run one crawl.
    ///
    /// Thread, asset and store failures are logged and the run continues.
    ///
    /// # Errors
    ///
    /// Returns an error only if the catalog cannot be fetched or parsed.
    pub async fn run(&self) -> Result<CrawlSummary> {
        let started = Instant::now();
        info!(board = %self.config.board_url, "Starting crawl");

        if let Err(e) = tokio::fs::create_dir_all(&self.config.archive_dir).await {
            error!(
                dir = %self.config.archive_dir.display(),
                "Failed to create archive directory: {e}"
            );
        }

        let mut known = KnownIdSet::load(&self.db).await;

        let threads = fetch_catalog(&self.fetcher, &self.config)
            .await
            .context("Catalog unavailable, aborting crawl")?;

        let diff = diff_catalog(&self.db, &known, &threads, self.config.max_threads_per_run).await;

        let mut summary = CrawlSummary {
            diff: diff.stats,
            ..CrawlSummary::default()
        };

        let total = diff.worklist.len();
        for (index, thread_id) in diff.worklist.iter().enumerate() {
            info!(thread_id = %thread_id, position = index + 1, total, "Scraping thread");

            match scrape_thread(&self.fetcher, &self.config, &self.db, &mut known, thread_id).await {
                Ok(outcome) => {
                    summary.threads_scraped += 1;
                    summary.posts_stored += outcome.posts_stored;
                    summary.store_failures += outcome.store_failures;
                    summary.reply_counts_refreshed += usize::from(outcome.reply_count_refreshed);
                }
                Err(e) => {
                    error!(thread_id = %thread_id, "Failed to scrape thread: {e:#}");
                    summary.threads_failed += 1;
                }
            }
        }

        summary.audit = audit_reply_counts(&self.db).await;
        summary.elapsed = started.elapsed();

        info!(
            new = summary.diff.new,
            updated = summary.diff.updated,
            unchanged = summary.diff.unchanged,
            scraped = summary.threads_scraped,
            failed = summary.threads_failed,
            posts_stored = summary.posts_stored,
            store_failures = summary.store_failures,
            audit_corrections = summary.audit.corrected,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Crawl complete"
        );

        Ok(summary)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}
