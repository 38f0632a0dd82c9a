//! Thread listing ("catalog") retrieval and parsing.

use anyhow::{Context, Result};
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use super::politeness::PoliteFetcher;
use crate::config::Config;

/// One thread as listed on the catalog page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSummary {
    pub id: String,
    pub observed_reply_count: i64,
}

/// Fetch and parse the catalog.
///
/// The run cannot continue without a complete listing, so every failure here is
/// returned to the caller.
///
/// # Errors
///
/// Returns an error if the page cannot be fetched or parsed.
pub async fn fetch_catalog(fetcher: &PoliteFetcher, config: &Config) -> Result<Vec<ThreadSummary>> {
    let catalog_url = config.catalog_url();
    info!(url = %catalog_url, "Fetching catalog");

    let html = fetcher
        .fetch_html(&catalog_url, config.catalog_delay)
        .await
        .context("Failed to fetch catalog")?;

    let threads = parse_catalog(&html, &catalog_url).context("Failed to parse catalog")?;
    info!(threads = threads.len(), "Catalog fetched");
    Ok(threads)
}

/// Parse the catalog page into thread summaries, in page order.
///
/// # Errors
///
/// Returns an error if the page URL is not absolute.
pub fn parse_catalog(html: &str, page_url: &str) -> Result<Vec<ThreadSummary>> {
    let base = Url::parse(page_url).with_context(|| format!("Invalid catalog URL: {page_url}"))?;
    let document = Html::parse_document(html);

    let preview_selector = Selector::parse(".preview").expect("Invalid selector");
    let link_selector = Selector::parse("a[href]").expect("Invalid selector");
    let count_selector = Selector::parse(".counts .count:first-child").expect("Invalid selector");

    let mut threads = Vec::new();

    for preview in document.select(&preview_selector) {
        let Some(href) = preview
            .select(&link_selector)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };

        let Some(id) = thread_id_from_href(&base, href) else {
            debug!(href = %href, "Skipping catalog entry without a thread id");
            continue;
        };

        let observed_reply_count = preview
            .select(&count_selector)
            .next()
            .map(|count| parse_reply_count(&count.text().collect::<String>()))
            .unwrap_or(0);

        threads.push(ThreadSummary {
            id,
            observed_reply_count,
        });
    }

    Ok(threads)
}

/// The thread id is the last non-empty path segment of the thread link.
fn thread_id_from_href(base: &Url, href: &str) -> Option<String> {
    let url = base.join(href).ok()?;
    url.path_segments()?
        .rev()
        .find(|segment| !segment.is_empty())
        .map(ToString::to_string)
}

/// Reply counts render as e.g. "12 replies"; anything unparsable counts as zero.
fn parse_reply_count(text: &str) -> i64 {
    text.split_whitespace()
        .next()
        .and_then(|token| token.parse().ok())
        .unwrap_or(0)
}
