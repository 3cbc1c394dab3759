//! Run the whole pipeline for one feed and print the resulting RSS to stdout.
//!
//! Usage: preview <feed-url> [selector] [selector-text]

use std::sync::Arc;

use anyhow::{Context, Result};
use common::Config;
use fullfeed::processing::Enricher;
use fullfeed::resolver::SelectorConfig;
use fullfeed::scraping::{self, HttpFetcher, ReadabilityExtractor};
use fullfeed::storage::ContentCache;
use fullfeed::{ingestion, syndication};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays valid XML
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().context("usage: preview <feed-url> [selector] [selector-text]")?;
    let selector = SelectorConfig::from_params(args.next(), args.next());

    let config = Config::default();
    let cache = ContentCache::open(&config.cache.dir).await?;
    let client = scraping::build_client(config.fetch_timeout_seconds(), &config.user_agent())?;
    let enricher = Enricher::new(
        cache,
        Arc::new(HttpFetcher::new(client.clone(), config.max_response_bytes())),
        Arc::new(ReadabilityExtractor),
    )
    .with_concurrency(config.enrichment_concurrency());

    let source = ingestion::load_source_feed(&client, &url, config.feed_retries()).await?;
    let total = source.items.len();
    let items = enricher.enrich_all(source.items, selector.as_ref()).await;
    eprintln!("{} items processed", total);

    println!("{}", syndication::to_rss2(&source.meta, &items)?);
    Ok(())
}
