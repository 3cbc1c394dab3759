/*!
common/src/lib.rs

Shared configuration types and helpers for fullfeed.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that merges a default file with an optional override
- Listening port resolution (environment, config file, fallback)
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Port used when neither `PORT` nor `server.port` is set.
pub const DEFAULT_PORT: u16 = 3000;

/// HTTP listener configuration section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind (e.g. "0.0.0.0")
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// On-disk article cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding one file per extracted article (e.g. "cache")
    pub dir: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: "cache".to_string(),
        }
    }
}

/// Politeness / fetching configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolitenessConfig {
    pub fetch_timeout_seconds: Option<u64>,
    pub max_response_bytes: Option<u64>,
    pub user_agent: Option<String>,
    /// Attempts made for the source feed before giving up (article pages get one)
    pub feed_retries: Option<u32>,
}

/// Per-request item enrichment configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Number of items enriched in parallel within one request
    pub concurrency: Option<usize>,
}

/// Whole-feed response cache (in memory, disabled unless asked for)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseCacheConfig {
    pub enabled: Option<bool>,
    pub ttl_seconds: Option<u64>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub politeness: Option<PolitenessConfig>,
    pub enrichment: Option<EnrichmentConfig>,
    pub response_cache: Option<ResponseCacheConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    /// Missing files are skipped, so with neither present this yields `Config::default()`.
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    pub fn fetch_timeout_seconds(&self) -> u64 {
        self.politeness
            .as_ref()
            .and_then(|p| p.fetch_timeout_seconds)
            .unwrap_or(10)
    }

    pub fn max_response_bytes(&self) -> u64 {
        self.politeness
            .as_ref()
            .and_then(|p| p.max_response_bytes)
            .unwrap_or(10 * 1024 * 1024)
    }

    pub fn user_agent(&self) -> String {
        self.politeness
            .as_ref()
            .and_then(|p| p.user_agent.clone())
            .unwrap_or_else(|| "Fullfeed/0.1.0".to_string())
    }

    pub fn feed_retries(&self) -> u32 {
        self.politeness
            .as_ref()
            .and_then(|p| p.feed_retries)
            .unwrap_or(3)
            .max(1)
    }

    pub fn enrichment_concurrency(&self) -> usize {
        self.enrichment
            .as_ref()
            .and_then(|e| e.concurrency)
            .unwrap_or(4)
            .max(1)
    }

    pub fn response_cache_enabled(&self) -> bool {
        self.response_cache
            .as_ref()
            .and_then(|r| r.enabled)
            .unwrap_or(false)
    }

    /// Defaults to ten hours.
    pub fn response_cache_ttl_seconds(&self) -> u64 {
        self.response_cache
            .as_ref()
            .and_then(|r| r.ttl_seconds)
            .unwrap_or(10 * 60 * 60)
    }

    /// Resolve the listening port: `PORT` environment value, then `server.port`, then `DEFAULT_PORT`.
    /// An unparseable `PORT` value is ignored.
    pub fn resolve_port(&self, env_port: Option<&str>) -> u16 {
        env_port
            .and_then(|p| p.trim().parse::<u16>().ok())
            .or(self.server.port)
            .unwrap_or(DEFAULT_PORT)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}
