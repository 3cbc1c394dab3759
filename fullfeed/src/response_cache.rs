use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::resolver::SelectorConfig;

/// In-memory cache of whole rendered feeds, keyed by request parameters.
///
/// Disabled by default: every request then recomputes the feed (article
/// bodies still come from the on-disk content cache).
pub struct ResponseCache {
    enabled: bool,
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, String)>>,
}

impl ResponseCache {
    pub fn new(enabled: bool, ttl: Duration) -> Self {
        Self {
            enabled,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn key(feed_url: &str, selector: Option<&SelectorConfig>) -> String {
        match selector {
            Some(s) => format!(
                "{}\n{}\n{}",
                feed_url,
                s.selector,
                s.selector_text.as_deref().unwrap_or_default()
            ),
            None => feed_url.to_string(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, xml)| xml.clone())
    }

    pub async fn put(&self, key: String, xml: String) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.write().await;
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() < self.ttl);
        entries.insert(key, (Instant::now(), xml));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_cache_never_stores() {
        let cache = ResponseCache::disabled();
        cache.put("k".to_string(), "<rss/>".to_string()).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn enabled_cache_returns_fresh_entries() {
        let cache = ResponseCache::new(true, Duration::from_secs(60));
        cache.put("k".to_string(), "<rss/>".to_string()).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("<rss/>"));
        assert_eq!(cache.get("other").await, None);
    }

    #[tokio::test]
    async fn expired_entries_are_ignored() {
        let cache = ResponseCache::new(true, Duration::from_millis(10));
        cache.put("k".to_string(), "<rss/>".to_string()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[test]
    fn key_distinguishes_selectors() {
        let plain = ResponseCache::key("http://f", None);
        let with_sel = ResponseCache::key(
            "http://f",
            Some(&SelectorConfig {
                selector: "a".to_string(),
                selector_text: None,
            }),
        );
        let with_text = ResponseCache::key(
            "http://f",
            Some(&SelectorConfig {
                selector: "a".to_string(),
                selector_text: Some("more".to_string()),
            }),
        );
        assert_ne!(plain, with_sel);
        assert_ne!(with_sel, with_text);
    }
}
