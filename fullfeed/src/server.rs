use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::figment::Figment;
use rocket::http::ContentType;
use rocket::serde::json::Json;
use rocket::{get, routes, Build, FromForm, Rocket, State};
use serde::Serialize;
use url::Url;

use crate::error::ProxyError;
use crate::ingestion;
use crate::processing::Enricher;
use crate::resolver::SelectorConfig;
use crate::response_cache::ResponseCache;
use crate::syndication;

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    /// Client used for the source feed itself.
    pub client: reqwest::Client,
    pub feed_retries: u32,
    pub enricher: Arc<Enricher>,
    pub response_cache: Arc<ResponseCache>,
}

/// Query string of the feed endpoint.
#[derive(Debug, FromForm)]
pub struct FeedQuery {
    url: Option<String>,
    selector: Option<String>,
    #[field(name = "selectorText")]
    selector_text: Option<String>,
}

/// Response structure for `/api/v1/status`.
#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    cached_articles: usize,
    response_cache_enabled: bool,
}

fn validate_feed_url(raw: Option<String>) -> Result<String, ProxyError> {
    let raw = raw
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or(ProxyError::MissingUrl)?;

    match Url::parse(&raw) {
        Ok(u) if matches!(u.scheme(), "http" | "https") && u.has_host() => Ok(raw),
        _ => Err(ProxyError::InvalidUrl(raw)),
    }
}

/// Full-content version of the feed at `url`.
#[get("/?<query..>")]
async fn full_feed(state: &State<AppState>, query: FeedQuery) -> Result<(ContentType, String), ProxyError> {
    let feed_url = validate_feed_url(query.url)?;
    let selector = SelectorConfig::from_params(query.selector, query.selector_text);

    let cache_key = ResponseCache::key(&feed_url, selector.as_ref());
    if let Some(xml) = state.response_cache.get(&cache_key).await {
        tracing::info!("serving cached feed for {}", feed_url);
        return Ok((ContentType::XML, xml));
    }

    let source = ingestion::load_source_feed(&state.client, &feed_url, state.feed_retries)
        .await
        .map_err(ProxyError::SourceFeed)?;

    let items = state.enricher.enrich_all(source.items, selector.as_ref()).await;
    let xml = syndication::to_rss2(&source.meta, &items).map_err(ProxyError::Serialization)?;

    state.response_cache.put(cache_key, xml.clone()).await;
    Ok((ContentType::XML, xml))
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

/// Status endpoint returning simple JSON with uptime and cache info.
#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    let cached_articles = match state.enricher.cache().len().await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!("failed to count cache entries: {:#}", e);
            0
        }
    };

    Json(StatusResponse {
        status: "ok",
        uptime_seconds: uptime,
        cached_articles,
        response_cache_enabled: state.response_cache.is_enabled(),
    })
}

/// Assemble the Rocket instance without launching it (tests drive it through a local client).
pub fn build_rocket(state: AppState, figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .manage(state)
        .mount("/", routes![full_feed, health, status])
}

/// Launch the HTTP server on `bind:port`; returns once Rocket shuts down.
pub async fn launch_rocket(state: AppState, bind: Option<&str>, port: u16) -> Result<()> {
    let mut fig = rocket::Config::figment().merge(("port", port));
    if let Some(bind) = bind {
        fig = fig.merge(("address", bind.to_string()));
    }

    // Launch Rocket - this will run until shutdown (SIGINT/SIGTERM etc.)
    tracing::info!("Starting Rocket HTTP server on port {}", port);
    build_rocket(state, fig)
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
