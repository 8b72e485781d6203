// src/config/aggregator.rs
//! Service configuration: `config/aggregator.toml` plus a few env overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::enrichment::EnrichmentConfig;

// --- env defaults & names ---
pub const DEFAULT_AGGREGATOR_CONFIG_PATH: &str = "config/aggregator.toml";
pub const ENV_AGGREGATOR_CONFIG_PATH: &str = "AGGREGATOR_CONFIG_PATH";
pub const ENV_TASK_TIMEOUT_MS: &str = "FANOUT_TASK_TIMEOUT_MS";
pub const ENV_AGGREGATE_CACHE_TTL_SECS: &str = "AGGREGATE_CACHE_TTL_SECS";

const DEFAULT_TASK_TIMEOUT_MS: u64 = 8_000;
const DEFAULT_GLOBAL_DEADLINE_MS: u64 = 20_000;
const DEFAULT_LIMIT: usize = 50;
const DEFAULT_MAX_LIMIT: usize = 500;
const DEFAULT_CACHE_TTL_SECS: u64 = 30 * 60;
const DEFAULT_CACHE_MAX_ENTRIES: usize = 256;
const DEFAULT_LOCATION_CACHE_PATH: &str = "cache/location_enrichments.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Rss,
    Json,
}

/// One `[[feeds]]` entry: a concrete source backed by a URL or a local fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub kind: FeedKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub fixture_path: Option<PathBuf>,
    #[serde(default)]
    pub default_category: Option<String>,
    #[serde(default)]
    pub default_venue: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub per_task_timeout_ms: u64,
    pub global_deadline_ms: u64,
    pub default_limit: usize,
    pub max_limit: usize,
    pub aggregate_cache_ttl_secs: u64,
    pub aggregate_cache_max_entries: usize,
    pub location_cache_path: PathBuf,
    pub default_country_hint: Option<String>,
    pub enrichment: EnrichmentConfig,
    pub feeds: Vec<FeedConfig>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            per_task_timeout_ms: DEFAULT_TASK_TIMEOUT_MS,
            global_deadline_ms: DEFAULT_GLOBAL_DEADLINE_MS,
            default_limit: DEFAULT_LIMIT,
            max_limit: DEFAULT_MAX_LIMIT,
            aggregate_cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            aggregate_cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            location_cache_path: PathBuf::from(DEFAULT_LOCATION_CACHE_PATH),
            default_country_hint: None,
            enrichment: EnrichmentConfig::default(),
            feeds: Vec::new(),
        }
    }
}

impl AggregatorConfig {
    /// Resolve path from `$AGGREGATOR_CONFIG_PATH` (or the default), load it if present,
    /// then apply env overrides. A missing file means defaults; a broken one is an error.
    pub fn load_default() -> anyhow::Result<Self> {
        let path = std::env::var(ENV_AGGREGATOR_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_AGGREGATOR_CONFIG_PATH));
        let cfg = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            tracing::info!(path = %path.display(), "no aggregator config file, using defaults");
            Self::default()
        };
        Ok(cfg.apply_env_overrides())
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading aggregator config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing aggregator config at {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let cfg: AggregatorConfig = toml::from_str(s)?;
        Ok(cfg.sanitized())
    }

    fn apply_env_overrides(mut self) -> Self {
        if let Some(ms) = parse_positive_env(ENV_TASK_TIMEOUT_MS) {
            self.per_task_timeout_ms = ms;
        }
        if let Some(secs) = parse_positive_env(ENV_AGGREGATE_CACHE_TTL_SECS) {
            self.aggregate_cache_ttl_secs = secs;
        }
        self.sanitized()
    }

    /// Replace nonsensical values with defaults instead of failing.
    fn sanitized(mut self) -> Self {
        if self.per_task_timeout_ms == 0 {
            self.per_task_timeout_ms = DEFAULT_TASK_TIMEOUT_MS;
        }
        if self.global_deadline_ms < self.per_task_timeout_ms {
            self.global_deadline_ms = self.per_task_timeout_ms.max(DEFAULT_GLOBAL_DEADLINE_MS);
        }
        if self.max_limit == 0 {
            self.max_limit = DEFAULT_MAX_LIMIT;
        }
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            self.default_limit = DEFAULT_LIMIT.min(self.max_limit);
        }
        if self.aggregate_cache_max_entries == 0 {
            self.aggregate_cache_max_entries = DEFAULT_CACHE_MAX_ENTRIES;
        }
        self.default_country_hint = self
            .default_country_hint
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty());
        self.enrichment = self.enrichment.resolve();
        self
    }

    pub fn per_task_timeout(&self) -> Duration {
        Duration::from_millis(self.per_task_timeout_ms)
    }

    pub fn global_deadline(&self) -> Duration {
        Duration::from_millis(self.global_deadline_ms)
    }

    pub fn aggregate_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.aggregate_cache_ttl_secs)
    }
}

fn parse_positive_env(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}
