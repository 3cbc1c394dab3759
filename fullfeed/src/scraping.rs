use anyhow::{Context, Result};
use reqwest::Client;
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Fetches the raw HTML of a page.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<String>;
}

/// Turns a full HTML page into the readable article fragment.
///
/// Returns `None` when the page has no recognizable article; callers treat
/// that as "leave the item alone", never as an error.
pub trait ArticleExtractor: Send + Sync {
    fn extract(&self, html: &str, base_url: &Url) -> Option<String>;
}

/// Builds the HTTP client shared by feed, intermediate page and article fetches.
pub fn build_client(timeout_secs: u64, user_agent: &str) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(user_agent)
        .build()
        .context("failed to build reqwest client")
}

/// [`PageFetcher`] over plain HTTP(S).
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    max_response_bytes: u64,
}

impl HttpFetcher {
    pub fn new(client: Client, max_response_bytes: u64) -> Self {
        Self {
            client,
            max_response_bytes,
        }
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String> {
        info!("Downloading page at {}", url);
        let response = self.client.get(url).send().await.context("failed to fetch page")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("page fetch failed with status: {}", status));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_response_bytes {
                anyhow::bail!("page too large: {} bytes (limit {})", len, self.max_response_bytes);
            }
        }

        // chunked bodies carry no length, so the cap is enforced while reading
        let mut response = response;
        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.context("failed to read response body")? {
            if (body.len() + chunk.len()) as u64 > self.max_response_bytes {
                anyhow::bail!("page too large: over {} bytes", self.max_response_bytes);
            }
            body.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// [`ArticleExtractor`] backed by the `readability` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadabilityExtractor;

impl ArticleExtractor for ReadabilityExtractor {
    fn extract(&self, html: &str, base_url: &Url) -> Option<String> {
        let mut reader = Cursor::new(html.as_bytes());

        match readability::extractor::extract(&mut reader, base_url) {
            Ok(product) => {
                // Readability falls back to the whole (possibly empty) body when it
                // finds no candidate; no visible text means no article.
                if product.text.trim().is_empty() || product.content.trim().is_empty() {
                    debug!("scraping: no readable text at {}", base_url);
                    return None;
                }
                info!("scraping: readability extracted {} chars from {}", product.content.len(), base_url);
                Some(product.content)
            }
            Err(e) => {
                warn!("scraping: readability failed for {}: {}", base_url, e);
                None
            }
        }
    }
}
