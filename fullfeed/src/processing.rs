use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::ingestion::FeedItem;
use crate::resolver::{self, SelectorConfig};
use crate::scraping::{ArticleExtractor, PageFetcher};
use crate::storage::ContentCache;

/// Per-item pipeline: resolve link, consult the cache, fetch, extract, store.
///
/// Every step that can fail is item-scoped: the item comes back unchanged and
/// the other items of the feed are unaffected.
#[derive(Clone)]
pub struct Enricher {
    cache: ContentCache,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn ArticleExtractor>,
    concurrency: usize,
}

impl Enricher {
    pub fn new(
        cache: ContentCache,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn ArticleExtractor>,
    ) -> Self {
        Self {
            cache,
            fetcher,
            extractor,
            concurrency: 1,
        }
    }

    /// Number of items enriched at once by [`Enricher::enrich_all`].
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Enrich a single item. Never fails; on any problem the item is returned as it was.
    pub async fn enrich_item(&self, mut item: FeedItem, selector: Option<&SelectorConfig>) -> FeedItem {
        let Some(target) = resolver::resolve(self.fetcher.as_ref(), &item.link, selector).await else {
            debug!("enrich: no target for item '{}', leaving it unchanged", item.link);
            return item;
        };

        match self.cache.get(&target).await {
            Ok(Some(cached)) => {
                debug!("enrich: cache hit for {}", target);
                item.content = Some(cached);
                return item;
            }
            Ok(None) => {}
            Err(e) => warn!("enrich: cache read failed for {}, refetching: {:#}", target, e),
        }

        let base_url = match Url::parse(&target) {
            Ok(u) => u,
            Err(e) => {
                warn!("enrich: resolved target {} is not a valid URL: {}", target, e);
                return item;
            }
        };

        let html = match self.fetcher.fetch_html(&target).await {
            Ok(html) => html,
            Err(e) => {
                warn!("enrich: failed to fetch {}: {:#}", target, e);
                return item;
            }
        };

        let extractor = Arc::clone(&self.extractor);
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(&html, &base_url)).await;
        let content = match extracted {
            Ok(Some(content)) => content,
            Ok(None) => {
                warn!("enrich: no article could be extracted from {}", target);
                return item;
            }
            Err(e) => {
                warn!("enrich: extraction task for {} failed: {}", target, e);
                return item;
            }
        };

        if let Err(e) = self.cache.put(&target, &content).await {
            warn!("enrich: failed to cache content for {}: {:#}", target, e);
        }

        item.content = Some(content);
        item
    }

    /// Enrich every item with bounded parallelism. The output has the same
    /// length and order as the input, whatever the per-item outcome.
    pub async fn enrich_all(&self, items: Vec<FeedItem>, selector: Option<&SelectorConfig>) -> Vec<FeedItem> {
        let total = items.len();
        if total == 0 {
            return items;
        }

        info!("Enriching {} items (concurrency {})", total, self.concurrency);

        let mut results: Vec<(usize, FeedItem)> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| async move { (index, self.enrich_item(item, selector).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, item)| item).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Serves canned pages and records every URL it was asked for.
    #[derive(Default)]
    struct FakeFetcher {
        pages: HashMap<String, String>,
        delays_ms: HashMap<String, u64>,
        requests: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn with_page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }

        fn with_delay(mut self, url: &str, ms: u64) -> Self {
            self.delays_ms.insert(url.to_string(), ms);
            self
        }

        fn requests_for(&self, url: &str) -> usize {
            self.requests.lock().expect("lock").iter().filter(|u| *u == url).count()
        }
    }

    #[async_trait::async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch_html(&self, url: &str) -> Result<String> {
            self.requests.lock().expect("lock").push(url.to_string());
            if let Some(ms) = self.delays_ms.get(url) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 for {}", url))
        }
    }

    /// Wraps the page body in a marker; pages containing "NOARTICLE" have no article.
    #[derive(Default)]
    struct FakeExtractor {
        calls: AtomicUsize,
    }

    impl ArticleExtractor for FakeExtractor {
        fn extract(&self, html: &str, _base_url: &Url) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if html.contains("NOARTICLE") {
                None
            } else {
                Some(format!("<article>{}</article>", html))
            }
        }
    }

    /// Panics on every page, like a parser choking on hostile markup.
    struct PanickingExtractor;

    impl ArticleExtractor for PanickingExtractor {
        fn extract(&self, html: &str, _base_url: &Url) -> Option<String> {
            if html.contains("BOOM") {
                panic!("extractor blew up");
            }
            Some(format!("<article>{}</article>", html))
        }
    }

    fn item(link: &str, summary: &str) -> FeedItem {
        FeedItem {
            link: link.to_string(),
            summary: Some(summary.to_string()),
            content: Some(summary.to_string()),
            ..Default::default()
        }
    }

    async fn enricher(
        dir: &tempfile::TempDir,
        fetcher: Arc<FakeFetcher>,
        extractor: Arc<FakeExtractor>,
    ) -> Enricher {
        let cache = ContentCache::open(dir.path()).await.expect("open cache");
        Enricher::new(cache, fetcher, extractor)
    }

    #[tokio::test]
    async fn second_enrichment_hits_cache_without_fetching() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(FakeFetcher::default().with_page("http://a/x", "<p>hello</p>"));
        let extractor = Arc::new(FakeExtractor::default());
        let enricher = enricher(&dir, fetcher.clone(), extractor.clone()).await;

        let first = enricher.enrich_item(item("http://a/x", "teaser"), None).await;
        assert_eq!(first.content.as_deref(), Some("<article><p>hello</p></article>"));
        assert_eq!(fetcher.requests_for("http://a/x"), 1);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

        let second = enricher.enrich_item(item("http://a/x", "teaser"), None).await;
        assert_eq!(second.content, first.content);
        assert_eq!(fetcher.requests_for("http://a/x"), 1);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn persisted_cache_serves_a_fresh_enricher() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(FakeFetcher::default().with_page("http://a/x", "<p>hello</p>"));
        let first = enricher(&dir, fetcher.clone(), Arc::new(FakeExtractor::default()))
            .await
            .enrich_item(item("http://a/x", "teaser"), None)
            .await;

        let cold_fetcher = Arc::new(FakeFetcher::default());
        let second = enricher(&dir, cold_fetcher.clone(), Arc::new(FakeExtractor::default()))
            .await
            .enrich_item(item("http://a/x", "teaser"), None)
            .await;

        assert_eq!(second.content, first.content);
        assert_eq!(cold_fetcher.requests_for("http://a/x"), 0);
    }

    #[tokio::test]
    async fn extractor_panic_is_isolated_to_its_item() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(
            FakeFetcher::default()
                .with_page("http://a/1", "one")
                .with_page("http://a/2", "BOOM"),
        );
        let cache = ContentCache::open(dir.path()).await.expect("open cache");
        let enricher = Enricher::new(cache.clone(), fetcher, Arc::new(PanickingExtractor)).with_concurrency(2);

        let out = enricher
            .enrich_all(vec![item("http://a/1", "s1"), item("http://a/2", "s2")], None)
            .await;

        assert_eq!(out[0].content.as_deref(), Some("<article>one</article>"));
        assert_eq!(out[1].content.as_deref(), Some("s2"));
        assert!(cache.get("http://a/2").await.expect("read cache").is_none());
    }

    #[tokio::test]
    async fn extraction_failure_is_isolated_to_its_item() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(
            FakeFetcher::default()
                .with_page("http://a/1", "one")
                .with_page("http://a/2", "NOARTICLE")
                .with_page("http://a/3", "three"),
        );
        let enricher = enricher(&dir, fetcher, Arc::new(FakeExtractor::default()))
            .await
            .with_concurrency(3);

        let out = enricher
            .enrich_all(
                vec![
                    item("http://a/1", "s1"),
                    item("http://a/2", "s2"),
                    item("http://a/3", "s3"),
                ],
                None,
            )
            .await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].content.as_deref(), Some("<article>one</article>"));
        assert_eq!(out[1].content.as_deref(), Some("s2"));
        assert_eq!(out[2].content.as_deref(), Some("<article>three</article>"));
        assert!(enricher.cache().get("http://a/2").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn fetch_failure_leaves_item_unchanged_and_uncached() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(FakeFetcher::default());
        let enricher = enricher(&dir, fetcher.clone(), Arc::new(FakeExtractor::default())).await;

        let original = item("http://a/missing", "teaser");
        let out = enricher.enrich_item(original.clone(), None).await;
        assert_eq!(out, original);
        assert!(enricher.cache().is_empty().await.expect("is_empty"));

        // failures are not cached, so the next request tries again
        enricher.enrich_item(original, None).await;
        assert_eq!(fetcher.requests_for("http://a/missing"), 2);
    }

    #[tokio::test]
    async fn order_is_preserved_when_items_finish_out_of_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(
            FakeFetcher::default()
                .with_page("http://a/slow", "slow")
                .with_delay("http://a/slow", 80)
                .with_page("http://a/medium", "medium")
                .with_delay("http://a/medium", 30)
                .with_page("http://a/fast", "fast"),
        );
        let enricher = enricher(&dir, fetcher, Arc::new(FakeExtractor::default()))
            .await
            .with_concurrency(4);

        let links = ["http://a/slow", "http://a/missing", "http://a/medium", "", "http://a/fast"];
        let items: Vec<FeedItem> = links.iter().map(|l| item(l, "summary")).collect();
        let out = enricher.enrich_all(items, None).await;

        let out_links: Vec<&str> = out.iter().map(|i| i.link.as_str()).collect();
        assert_eq!(out_links, links);
        assert_eq!(out[0].content.as_deref(), Some("<article>slow</article>"));
        assert_eq!(out[1].content.as_deref(), Some("summary"));
        assert_eq!(out[3].content.as_deref(), Some("summary"));
        assert_eq!(out[4].content.as_deref(), Some("<article>fast</article>"));
    }

    #[tokio::test]
    async fn selector_resolution_keys_cache_by_target_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = r#"<a class="go" href="http://a/article">Read more</a>"#;
        let fetcher = Arc::new(
            FakeFetcher::default()
                .with_page("http://a/teaser", index)
                .with_page("http://a/article", "the real story"),
        );
        let enricher = enricher(&dir, fetcher.clone(), Arc::new(FakeExtractor::default())).await;
        let selector = SelectorConfig {
            selector: "a.go".to_string(),
            selector_text: Some("Read".to_string()),
        };

        let out = enricher.enrich_item(item("http://a/teaser", "teaser"), Some(&selector)).await;
        assert_eq!(out.content.as_deref(), Some("<article>the real story</article>"));
        assert!(enricher.cache().get("http://a/article").await.expect("get").is_some());
        assert!(enricher.cache().get("http://a/teaser").await.expect("get").is_none());

        // the intermediate page is fetched again, the article is not
        enricher.enrich_item(item("http://a/teaser", "teaser"), Some(&selector)).await;
        assert_eq!(fetcher.requests_for("http://a/teaser"), 2);
        assert_eq!(fetcher.requests_for("http://a/article"), 1);
    }

    #[tokio::test]
    async fn unresolvable_selector_leaves_item_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(FakeFetcher::default().with_page("http://a/teaser", "<p>no links</p>"));
        let enricher = enricher(&dir, fetcher, Arc::new(FakeExtractor::default())).await;
        let selector = SelectorConfig {
            selector: "a.go".to_string(),
            selector_text: None,
        };

        let original = item("http://a/teaser", "teaser");
        let out = enricher.enrich_item(original.clone(), Some(&selector)).await;
        assert_eq!(out, original);
    }

    #[tokio::test]
    async fn empty_feed_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let enricher = enricher(&dir, Arc::new(FakeFetcher::default()), Arc::new(FakeExtractor::default())).await;
        assert!(enricher.enrich_all(Vec::new(), None).await.is_empty());
    }
}
