use anyhow::{Context, Result};
use feed_rs::model::{Entry, Feed, Link};
use feed_rs::parser;
use reqwest::Client;
use std::time::Duration;

/// One item of the source feed, normalized from RSS or Atom.
///
/// `content` starts as whatever body the source carried and is replaced by
/// the extracted article when enrichment succeeds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    /// Canonical item URL; empty when the entry had no link at all.
    pub link: String,
    pub guid: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    /// Raw publish date (RFC 3339 when produced by [`normalize`]).
    pub published: Option<String>,
    pub author: Option<String>,
    pub categories: Vec<String>,
    pub content: Option<String>,
}

/// Channel-level metadata carried over into the output feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedMeta {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SourceFeed {
    pub meta: FeedMeta,
    pub items: Vec<FeedItem>,
}

/// Fetches a feed from the given URL and parses it.
/// 5xx, 429 and network errors are retried up to `max_attempts` times with
/// exponential backoff; other 4xx statuses and parse failures are returned at once.
pub async fn fetch_and_parse_feed(client: &Client, url: &str, max_attempts: u32) -> Result<Feed> {
    let mut last_error = None;

    for attempt in 1..=max_attempts.max(1) {
        if attempt > 1 {
            let backoff = Duration::from_secs(2u64.pow(attempt - 2)); // 1s, 2s, 4s...
            tracing::info!("Retrying feed fetch for {} (attempt {}/{}) after {:?}...", url, attempt, max_attempts, backoff);
            tokio::time::sleep(backoff).await;
        }

        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let bytes = response.bytes().await.context("failed to read response body")?;
                    return parse_feed(bytes.as_ref());
                } else if status.is_server_error() {
                    last_error = Some(anyhow::anyhow!("server error: {}", status));
                } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    last_error = Some(anyhow::anyhow!("rate limited: {}", status));
                } else {
                    // Client error (4xx) - likely permanent, don't retry
                    return Err(anyhow::anyhow!("feed fetch failed with status: {}", status));
                }
            }
            Err(e) => {
                last_error = Some(anyhow::Error::new(e).context("network error during fetch"));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
}

/// Parse an RSS/Atom document.
///
/// Entries without a `<guid>`/`<id>` keep an empty id instead of one made up
/// by the parser, so the output can fall back to the item link.
pub fn parse_feed(bytes: &[u8]) -> Result<Feed> {
    parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
        .parse(bytes)
        .context("failed to parse feed")
}

/// Fetch the source feed and normalize it in one step.
pub async fn load_source_feed(client: &Client, url: &str, max_attempts: u32) -> Result<SourceFeed> {
    let feed = fetch_and_parse_feed(client, url, max_attempts).await?;
    let source = normalize(feed);
    tracing::info!("Fetched feed '{}': {} items", url, source.items.len());
    Ok(source)
}

/// Convert a parsed RSS/Atom document into the proxy's item list.
/// Entry order is preserved and no entry is dropped.
pub fn normalize(feed: Feed) -> SourceFeed {
    let meta = FeedMeta {
        title: feed.title.map(|t| t.content),
        link: page_link(&feed.links),
        description: feed.description.map(|d| d.content),
        image: feed.logo.or(feed.icon).map(|i| i.uri),
    };

    let items = feed.entries.into_iter().map(normalize_entry).collect();

    SourceFeed { meta, items }
}

/// The HTML page of a feed or entry: the first `alternate` link (a missing
/// `rel` means alternate), else the first link of any kind.
fn page_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
}

fn normalize_entry(entry: Entry) -> FeedItem {
    let link = page_link(&entry.links).unwrap_or_default();
    if link.is_empty() {
        tracing::debug!("Entry {:?} has no link, it will pass through unchanged", entry.id);
    }

    let guid = if entry.id.is_empty() { None } else { Some(entry.id) };

    FeedItem {
        link,
        guid,
        title: entry.title.map(|t| t.content),
        summary: entry.summary.map(|s| s.content),
        published: entry.published.or(entry.updated).map(|d| d.to_rfc3339()),
        author: entry
            .authors
            .into_iter()
            .map(|p| p.name)
            .find(|name| !name.trim().is_empty()),
        categories: entry
            .categories
            .into_iter()
            .map(|c| c.label.unwrap_or(c.term))
            .collect(),
        content: entry.content.and_then(|c| c.body),
    }
}
