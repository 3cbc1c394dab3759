//! RSS 2.0 output.
//!
//! Items are first mapped onto [`OutputItem`] (plain data, easy to assert on)
//! and then written with the `rss` crate.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use rss::extension::dublincore::DublinCoreExtension;
use rss::{ChannelBuilder, Guid, Image, ItemBuilder};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::ingestion::{FeedItem, FeedMeta};

const CONTENT_NS: &str = "http://purl.org/rss/1.0/modules/content/";
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
const GENERATOR: &str = "fullfeed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
}

/// One item as it will be written.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputItem {
    pub title: Option<String>,
    pub guid: Option<String>,
    pub date: Option<DateTime<FixedOffset>>,
    pub link: Option<String>,
    pub author: Vec<Person>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub category: Vec<Category>,
}

/// Parse a feed date leniently. Unknown formats yield `None` instead of an error.
pub fn parse_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .ok()
}

/// Guid for an item that has neither a guid nor a link: a digest of its
/// title and summary, so it stays the same from one request to the next.
fn content_guid(item: &FeedItem) -> Option<String> {
    if item.title.is_none() && item.summary.is_none() {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(item.title.as_deref().unwrap_or_default().as_bytes());
    hasher.update(b"\n");
    hasher.update(item.summary.as_deref().unwrap_or_default().as_bytes());
    Some(hex::encode(hasher.finalize()))
}

impl From<&FeedItem> for OutputItem {
    fn from(item: &FeedItem) -> Self {
        let link = Some(item.link.clone()).filter(|l| !l.is_empty());
        let date = item.published.as_deref().and_then(|raw| {
            let parsed = parse_date(raw);
            if parsed.is_none() {
                tracing::debug!("syndication: dropping unparseable date {:?} on {}", raw, item.link);
            }
            parsed
        });

        OutputItem {
            title: item.title.clone(),
            guid: item
                .guid
                .clone()
                .or_else(|| link.clone())
                .or_else(|| content_guid(item)),
            date,
            link,
            author: item
                .author
                .iter()
                .map(|name| Person { name: name.clone() })
                .collect(),
            description: item.summary.clone(),
            content: item.content.clone().or_else(|| item.summary.clone()),
            category: item
                .categories
                .iter()
                .map(|name| Category { name: name.clone() })
                .collect(),
        }
    }
}

impl OutputItem {
    fn into_rss(self) -> rss::Item {
        let guid = self.guid.map(|value| Guid {
            permalink: self.link.as_deref() == Some(value.as_str()),
            value,
        });

        let dublin_core = if self.author.is_empty() {
            None
        } else {
            Some(DublinCoreExtension {
                creators: self.author.into_iter().map(|p| p.name).collect(),
                ..Default::default()
            })
        };

        ItemBuilder::default()
            .title(self.title)
            .link(self.link)
            .guid(guid)
            .pub_date(self.date.map(|d| d.to_rfc2822()))
            .description(self.description)
            .content(self.content)
            .categories(
                self.category
                    .into_iter()
                    .map(|c| rss::Category {
                        name: c.name,
                        domain: None,
                    })
                    .collect::<Vec<_>>(),
            )
            .dublin_core_ext(dublin_core)
            .build()
    }
}

/// Build the RSS 2.0 channel for a feed and its (enriched) items, in item order.
pub fn build_channel(meta: &FeedMeta, items: &[FeedItem]) -> rss::Channel {
    let title = meta.title.clone().unwrap_or_default();
    let link = meta.link.clone().unwrap_or_default();
    // <description> is mandatory in RSS 2.0
    let description = meta
        .description
        .clone()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| title.clone());

    let image = meta.image.as_ref().map(|url| Image {
        url: url.clone(),
        title: title.clone(),
        link: link.clone(),
        ..Default::default()
    });

    let mut namespaces = BTreeMap::new();
    namespaces.insert("content".to_string(), CONTENT_NS.to_string());
    namespaces.insert("dc".to_string(), DC_NS.to_string());

    ChannelBuilder::default()
        .title(title.clone())
        .link(link)
        .description(description)
        .copyright(Some(title))
        .image(image)
        .generator(Some(GENERATOR.to_string()))
        .namespaces(namespaces)
        .items(
            items
                .iter()
                .map(|item| OutputItem::from(item).into_rss())
                .collect::<Vec<_>>(),
        )
        .build()
}

/// Serialize a feed to an RSS 2.0 XML string.
pub fn to_rss2(meta: &FeedMeta, items: &[FeedItem]) -> Result<String> {
    let channel = build_channel(meta, items);
    let bytes = channel
        .write_to(Vec::new())
        .context("failed to write RSS document")?;
    String::from_utf8(bytes).context("RSS document is not valid UTF-8")
}
