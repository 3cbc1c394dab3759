/*
fullfeed - main.rs
Loads configuration, opens the article cache and serves the full-content feed endpoint.
*/

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use fullfeed::processing::Enricher;
use fullfeed::response_cache::ResponseCache;
use fullfeed::scraping::{self, HttpFetcher, ReadabilityExtractor};
use fullfeed::server::{self, AppState};
use fullfeed::storage::ContentCache;

#[derive(Parser, Debug)]
#[command(name = "fullfeed", about = "Full-content RSS/Atom proxy")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listening port (the PORT environment variable takes precedence)
    #[arg(long)]
    port: Option<u16>,

    /// Override the article cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<String>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let mut config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    if let Some(port) = args.port {
        config.server.port = Some(port);
    }
    if let Some(dir) = args.cache_dir {
        config.cache.dir = dir;
    }

    let cache = match ContentCache::open(&config.cache.dir).await {
        Ok(c) => c,
        Err(e) => {
            error!(%e, dir = %config.cache.dir, "failed to open article cache");
            return Err(e);
        }
    };
    info!(dir = %config.cache.dir, "article cache ready");

    let client = scraping::build_client(config.fetch_timeout_seconds(), &config.user_agent())?;
    let fetcher = HttpFetcher::new(client.clone(), config.max_response_bytes());
    let enricher = Enricher::new(cache, Arc::new(fetcher), Arc::new(ReadabilityExtractor))
        .with_concurrency(config.enrichment_concurrency());

    let response_cache = ResponseCache::new(
        config.response_cache_enabled(),
        Duration::from_secs(config.response_cache_ttl_seconds()),
    );
    if response_cache.is_enabled() {
        info!(ttl_seconds = config.response_cache_ttl_seconds(), "whole-feed response cache enabled");
    }

    let state = AppState {
        started_at: Utc::now(),
        client,
        feed_retries: config.feed_retries(),
        enricher: Arc::new(enricher),
        response_cache: Arc::new(response_cache),
    };

    let port = config.resolve_port(std::env::var("PORT").ok().as_deref());
    if let Err(e) = server::launch_rocket(state, config.server.bind.as_deref(), port).await {
        error!(%e, "Rocket server failed");
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}
