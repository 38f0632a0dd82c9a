//! Scraping of a single thread page.
//!
//! A thread page has one `.post.orig` node and zero or more `.post.reply`
//! nodes. Posts already in the [`KnownIdSet`] are not re-parsed: a known reply
//! is skipped outright and a known original post only has its reply count
//! refreshed.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use scraper::{CaseSensitivity, ElementRef, Html, Node, Selector};
use tracing::{debug, error, info, warn};
use url::Url;

use super::known::KnownIdSet;
use super::politeness::PoliteFetcher;
use crate::assets::archive_post_image;
use crate::config::Config;
use crate::constants::POST_TIMESTAMP_FORMAT;
use crate::db::{
    update_reply_count, upsert_post, Database, OriginalPost, Post, PostContent, ReplyPost,
};

/// Sub-elements of a post body that are navigation, not content.
const BODY_NOISE_CLASSES: &[&str] = &["fwd-links", "floating-preview"];

/// Content pulled out of one post node, before any image is archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPost {
    pub id: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub body: String,
    pub image_url: Option<String>,
}

/// The thread's original post as found on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginalStatus {
    /// Already stored; only the id was read.
    Known { id: String },
    New { post: ExtractedPost, title: String },
}

impl OriginalStatus {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Known { id } => id,
            Self::New { post, .. } => &post.id,
        }
    }
}

/// Result of parsing a thread page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedThread {
    pub original: OriginalStatus,
    /// Replies not yet in the store, in page order.
    pub new_replies: Vec<ExtractedPost>,
    /// Every post node on the page, known or not.
    pub total_posts: usize,
}

impl ParsedThread {
    /// Reply count the original post should carry.
    #[must_use]
    pub fn reply_count(&self) -> i64 {
        self.total_posts.saturating_sub(1) as i64
    }
}

/// What scraping one thread changed in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadOutcome {
    pub posts_stored: usize,
    pub reply_count_refreshed: bool,
    pub store_failures: usize,
}

struct PostSelectors {
    original: Selector,
    reply: Selector,
    id: Selector,
    title: Selector,
    author: Selector,
    time: Selector,
    body: Selector,
    body_fallback: Selector,
    image_link: Selector,
}

impl PostSelectors {
    fn new() -> Self {
        let parse = |s: &str| Selector::parse(s).expect("Invalid selector");
        Self {
            original: parse(".post.orig"),
            reply: parse(".post.reply"),
            id: parse("a.subtle-link"),
            title: parse("span.post-title"),
            author: parse("span.post-nick"),
            time: parse("span.post-time"),
            body: parse("p.post-body"),
            body_fallback: parse("div.post-body"),
            image_link: parse(".post-image-frame a"),
        }
    }
}

/// Fetch, parse and persist one thread.
///
/// # Errors
///
/// Returns an error if the page cannot be fetched or has no original post.
/// Store failures for individual posts are logged and counted, not returned.
pub async fn scrape_thread(
    fetcher: &PoliteFetcher,
    config: &Config,
    db: &Database,
    known: &mut KnownIdSet,
    thread_id: &str,
) -> Result<ThreadOutcome> {
    let thread_url = config.thread_url(thread_id);
    debug!(thread_id = %thread_id, url = %thread_url, "Fetching thread");

    let html = fetcher.fetch_html(&thread_url, config.thread_delay).await?;

    let parsed = parse_thread(&html, &thread_url, known)
        .with_context(|| format!("Failed to parse thread {thread_id}"))?;
    info!(
        thread_id = %thread_id,
        total_posts = parsed.total_posts,
        new_replies = parsed.new_replies.len(),
        original_known = matches!(parsed.original, OriginalStatus::Known { .. }),
        "Parsed thread"
    );

    Ok(store_thread(fetcher, config, db, known, thread_id, parsed).await)
}

/// Persist the posts of a parsed thread.
async fn store_thread(
    fetcher: &PoliteFetcher,
    config: &Config,
    db: &Database,
    known: &mut KnownIdSet,
    thread_id: &str,
    parsed: ParsedThread,
) -> ThreadOutcome {
    let mut outcome = ThreadOutcome::default();
    let reply_count = parsed.reply_count();

    let original = match parsed.original {
        OriginalStatus::Known { id } => {
            match update_reply_count(db.pool(), &id, reply_count).await {
                Ok(true) => {
                    debug!(post_id = %id, reply_count, "Refreshed reply count");
                    outcome.reply_count_refreshed = true;
                }
                Ok(false) => {
                    warn!(post_id = %id, "Known original post has no stored row to refresh");
                }
                Err(e) => {
                    error!(post_id = %id, "Failed to refresh reply count: {e:#}");
                    outcome.store_failures += 1;
                }
            }
            None
        }
        OriginalStatus::New { post, title } => {
            let content = archive_content(fetcher, config, thread_id, post).await;
            Some(Post::Original(OriginalPost {
                content,
                title,
                reply_count,
            }))
        }
    };

    let mut posts: Vec<Post> = original.into_iter().collect();
    for reply in parsed.new_replies {
        let content = archive_content(fetcher, config, thread_id, reply).await;
        posts.push(Post::Reply(ReplyPost { content }));
    }

    for post in posts {
        match upsert_post(db.pool(), &post).await {
            Ok(()) => {
                debug!(post_id = %post.id(), "Stored post");
                known.insert(post.id());
                outcome.posts_stored += 1;
            }
            Err(e) => {
                error!(post_id = %post.id(), "Failed to store post: {e:#}");
                outcome.store_failures += 1;
            }
        }
    }

    outcome
}

/// Download the post's image, if any, and build the storable content.
async fn archive_content(
    fetcher: &PoliteFetcher,
    config: &Config,
    thread_id: &str,
    post: ExtractedPost,
) -> PostContent {
    let local_image_path = match post.image_url.as_deref() {
        Some(url) => match fetcher.acquire(url, Duration::ZERO).await {
            Ok(_permit) => {
                archive_post_image(
                    fetcher.client(),
                    url,
                    &post.id,
                    &config.archive_dir,
                    config.thumbnail_max_px,
                )
                .await
            }
            Err(e) => {
                warn!(post_id = %post.id, "Storing post without image: {e:#}");
                None
            }
        },
        None => None,
    };

    PostContent {
        id: post.id,
        thread_id: thread_id.to_string(),
        author: post.author,
        created_at: post.created_at,
        body: post.body,
        remote_image_url: post.image_url,
        local_image_path,
    }
}

/// Parse a thread page.
///
/// # Errors
///
/// Returns an error if the page URL is not absolute or the page has no
/// original post with an id.
pub fn parse_thread(html: &str, page_url: &str, known: &KnownIdSet) -> Result<ParsedThread> {
    let base = Url::parse(page_url).with_context(|| format!("Invalid thread URL: {page_url}"))?;
    let document = Html::parse_document(html);
    let selectors = PostSelectors::new();

    let original_node = document
        .select(&selectors.original)
        .next()
        .context("Thread page has no original post")?;
    let original_id =
        post_id(&original_node, &selectors).context("Original post has no id")?;

    let original = if known.contains(&original_id) {
        debug!(post_id = %original_id, "Original post already stored, refreshing reply count only");
        OriginalStatus::Known { id: original_id }
    } else {
        let title = child_text(&original_node, &selectors.title);
        let post = extract_post(&original_node, original_id, &selectors, &base);
        OriginalStatus::New { post, title }
    };

    let mut total_posts = 1;
    let mut new_replies = Vec::new();

    for node in document.select(&selectors.reply) {
        total_posts += 1;

        let Some(id) = post_id(&node, &selectors) else {
            debug!("Skipping reply without a numeric id");
            continue;
        };
        if known.contains(&id) {
            continue;
        }

        new_replies.push(extract_post(&node, id, &selectors, &base));
    }

    Ok(ParsedThread {
        original,
        new_replies,
        total_posts,
    })
}

/// Post id from the "No.12345" link. Anything but a plain number is rejected.
fn post_id(node: &ElementRef<'_>, selectors: &PostSelectors) -> Option<String> {
    let text = child_text(node, &selectors.id);
    let id = text.strip_prefix("No.").unwrap_or(&text).trim();
    if id.is_empty() {
        return None;
    }
    if !id.bytes().all(|b| b.is_ascii_digit()) {
        debug!(id = %id, "Ignoring non-numeric post id");
        return None;
    }
    Some(id.to_string())
}

fn extract_post(
    node: &ElementRef<'_>,
    id: String,
    selectors: &PostSelectors,
    base: &Url,
) -> ExtractedPost {
    let timestamp = node
        .select(&selectors.time)
        .next()
        .and_then(|el| el.value().attr("title"))
        .unwrap_or_default();

    let body = node
        .select(&selectors.body)
        .next()
        .or_else(|| node.select(&selectors.body_fallback).next())
        .map(|el| clean_body_text(&el))
        .unwrap_or_default();

    let image_url = node
        .select(&selectors.image_link)
        .next()
        .and_then(|el| el.value().attr("href"))
        .filter(|href| !href.is_empty())
        .and_then(|href| base.join(href).ok())
        .map(String::from);

    ExtractedPost {
        created_at: parse_timestamp(timestamp, &id),
        author: child_text(node, &selectors.author),
        body,
        image_url,
        id,
    }
}

/// Parse the post timestamp, falling back to the current time.
fn parse_timestamp(text: &str, post_id: &str) -> DateTime<Utc> {
    match NaiveDateTime::parse_from_str(text.trim(), POST_TIMESTAMP_FORMAT) {
        Ok(naive) => naive.and_utc(),
        Err(e) => {
            warn!(post_id = %post_id, timestamp = %text, "Unparsable timestamp, using now: {e}");
            Utc::now()
        }
    }
}

/// Trimmed text of the first matching descendant.
fn child_text(node: &ElementRef<'_>, selector: &Selector) -> String {
    node.select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// Body text with navigation sub-elements removed and `<br>` as newlines.
fn clean_body_text(body: &ElementRef<'_>) -> String {
    let mut text = String::new();
    collect_text(body, &mut text);
    text.trim().to_string()
}

fn collect_text(element: &ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if el.name() == "br" => out.push('\n'),
            Node::Element(el) => {
                if BODY_NOISE_CLASSES
                    .iter()
                    .any(|class| el.has_class(class, CaseSensitivity::CaseSensitive))
                {
                    continue;
                }
                if let Some(child_ref) = ElementRef::wrap(child) {
                    collect_text(&child_ref, out);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const THREAD_URL: &str = "https://board.example.com/pt/thread/500";

    const THREAD_HTML: &str = r##"
        <html><body>
        <div class="thread">
          <div class="post orig" id="post-500">
            <a class="subtle-link" href="#post-500">No.500</a>
            <span class="post-title">Sonnets about rivers</span>
            <span class="post-nick">Laura</span>
            <span class="post-time" title="2024-03-05 14:30:00 UTC">3 days ago</span>
            <div class="post-image-frame"><a href="/pt/src/500.png"><img src="/pt/thumb/500.png"></a></div>
            <p class="post-body">First line<br>second line
              <span class="fwd-links"><a href="#post-501">&gt;&gt;501</a></span>
            </p>
          </div>
          <div class="post reply" id="post-501">
            <a class="subtle-link" href="#post-501">No.501</a>
            <span class="post-nick">Anonymous</span>
            <span class="post-time" title="2024-03-05 15:00:00 UTC">3 days ago</span>
            <p class="post-body">&gt;&gt;500 agreed<span class="floating-preview">quoted text</span></p>
          </div>
          <div class="post reply" id="post-502">
            <a class="subtle-link" href="#post-502">No.502</a>
            <span class="post-nick">Anonymous</span>
            <span class="post-time" title="yesterday-ish">yesterday</span>
            <div class="post-body">  only a div body  </div>
          </div>
        </div>
        </body></html>
    "##;

    #[test]
    fn test_parse_new_thread() {
        let parsed = parse_thread(THREAD_HTML, THREAD_URL, &KnownIdSet::default()).unwrap();

        assert_eq!(parsed.total_posts, 3);
        assert_eq!(parsed.reply_count(), 2);

        let OriginalStatus::New { post, title } = &parsed.original else {
            panic!("expected a new original post");
        };
        assert_eq!(title, "Sonnets about rivers");
        assert_eq!(post.id, "500");
        assert_eq!(post.author, "Laura");
        assert_eq!(
            post.created_at,
            Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap()
        );
        assert_eq!(post.body, "First line\nsecond line");
        assert_eq!(
            post.image_url.as_deref(),
            Some("https://board.example.com/pt/src/500.png")
        );

        assert_eq!(parsed.new_replies.len(), 2);
        assert_eq!(parsed.new_replies[0].id, "501");
        assert_eq!(parsed.new_replies[0].body, ">>500 agreed");
        assert_eq!(parsed.new_replies[0].image_url, None);
        assert_eq!(parsed.new_replies[1].body, "only a div body");
    }

    #[test]
    fn test_known_posts_are_not_reparsed() {
        let known: KnownIdSet = ["500", "501"].into_iter().collect();
        let parsed = parse_thread(THREAD_HTML, THREAD_URL, &known).unwrap();

        assert_eq!(
            parsed.original,
            OriginalStatus::Known { id: "500".to_string() }
        );
        assert_eq!(parsed.new_replies.len(), 1);
        assert_eq!(parsed.new_replies[0].id, "502");
        // Known posts still count towards the reply total.
        assert_eq!(parsed.total_posts, 3);
    }

    #[test]
    fn test_unparsable_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let parsed = parse_thread(THREAD_HTML, THREAD_URL, &KnownIdSet::default()).unwrap();
        assert!(parsed.new_replies[1].created_at >= before);
    }

    #[test]
    fn test_page_without_original_post_fails() {
        let html = r#"<div class="post reply"><a class="subtle-link">No.9</a></div>"#;
        assert!(parse_thread(html, THREAD_URL, &KnownIdSet::default()).is_err());
    }

    #[test]
    fn test_non_numeric_post_ids_are_rejected() {
        let html = r##"
            <div class="post orig">
              <a class="subtle-link" href="#p">No.../../../tmp/escape</a>
              <div class="post-image-frame"><a href="/pt/src/x.png">img</a></div>
            </div>
        "##;
        assert!(parse_thread(html, THREAD_URL, &KnownIdSet::default()).is_err());

        let html = r##"
            <div class="post orig"><a class="subtle-link">No.80</a></div>
            <div class="post reply"><a class="subtle-link">No.81/../x</a></div>
            <div class="post reply"><a class="subtle-link">No. 82 </a></div>
        "##;
        let parsed = parse_thread(html, THREAD_URL, &KnownIdSet::default()).unwrap();
        assert_eq!(parsed.original.id(), "80");
        let ids: Vec<&str> = parsed.new_replies.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["82"]);
        // Rejected nodes are still posts on the page.
        assert_eq!(parsed.reply_count(), 2);
    }

    #[test]
    fn test_thread_with_no_replies() {
        let html = r#"
            <div class="post orig">
              <a class="subtle-link">No.77</a>
              <span class="post-title"></span>
              <span class="post-nick">Anonymous</span>
              <p class="post-body">alone</p>
            </div>
        "#;
        let parsed = parse_thread(html, THREAD_URL, &KnownIdSet::default()).unwrap();
        assert_eq!(parsed.original.id(), "77");
        assert_eq!(parsed.reply_count(), 0);
        assert!(parsed.new_replies.is_empty());
    }
}
