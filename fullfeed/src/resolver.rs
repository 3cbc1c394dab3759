//! Selector-driven link resolution.
//!
//! Some feeds link every item to a teaser or index page instead of the
//! article itself. A request may carry a CSS selector (and optionally a piece
//! of anchor text) that picks the real article link out of that page.

use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::scraping::PageFetcher;

/// Request-scoped link resolution rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorConfig {
    pub selector: String,
    /// Substring the chosen element's text must contain.
    pub selector_text: Option<String>,
}

impl SelectorConfig {
    /// Build from raw query values. A blank selector means "no selector";
    /// blank text means "take the first match".
    pub fn from_params(selector: Option<String>, selector_text: Option<String>) -> Option<Self> {
        let selector = selector.filter(|s| !s.trim().is_empty())?;
        Some(Self {
            selector,
            selector_text: selector_text.filter(|t| !t.is_empty()),
        })
    }
}

/// Determine the URL whose page should be extracted for an item.
///
/// Without a selector this is the item link itself. With one, the item page
/// is fetched (every time, it is never cached) and searched. Any failure
/// along the way yields `None`.
pub async fn resolve(
    fetcher: &dyn PageFetcher,
    item_link: &str,
    selector: Option<&SelectorConfig>,
) -> Option<String> {
    if item_link.trim().is_empty() {
        return None;
    }

    let Some(config) = selector else {
        return Some(item_link.to_string());
    };

    let base = match Url::parse(item_link) {
        Ok(u) => u,
        Err(e) => {
            warn!("resolver: item link {} is not a valid URL: {}", item_link, e);
            return None;
        }
    };

    let html = match fetcher.fetch_html(item_link).await {
        Ok(html) => html,
        Err(e) => {
            warn!("resolver: failed to fetch intermediate page {}: {:#}", item_link, e);
            return None;
        }
    };

    let target = find_target(&html, &base, config);
    match &target {
        Some(t) => debug!("resolver: {} -> {}", item_link, t),
        None => warn!("resolver: no target found on {} for selector '{}'", item_link, config.selector),
    }
    target
}

/// Apply `config` to an already-fetched page and return the absolute target URL.
pub fn find_target(html: &str, base_url: &Url, config: &SelectorConfig) -> Option<String> {
    let selector = match Selector::parse(&config.selector) {
        Ok(s) => s,
        Err(e) => {
            warn!("resolver: invalid selector '{}': {:?}", config.selector, e);
            return None;
        }
    };

    let document = Html::parse_document(html);
    let mut candidates = document.select(&selector);

    let chosen = match config.selector_text.as_deref() {
        Some(needle) => candidates.find(|el| el.text().collect::<String>().contains(needle)),
        None => candidates.next(),
    }?;

    let href = chosen.value().attr("href")?.trim();
    if href.is_empty() {
        return None;
    }

    base_url.join(href).ok().map(String::from)
}
