// src/aggregator.rs
//! Query API: resolve the location, fan out, normalize, dedup, filter and rank,
//! with whole results cached for a short TTL.
//!
//! The only error a caller can see is [`QueryError`], raised before dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use futures::stream::{Stream, StreamExt};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::AggregateCache;
use crate::config::AggregatorConfig;
use crate::error::QueryError;
use crate::ingest::config::load_allowlist;
use crate::ingest::dedup::Deduplicator;
use crate::ingest::fanout::{FanoutEngine, RunOutcome, SourceRunResult};
use crate::ingest::normalize::{parse_start_time, valid_lat_lon};
use crate::ingest::registry::SourceRegistry;
use crate::ingest::types::{CanonicalEvent, FetchQuery};
use crate::location::provider::build_provider;
use crate::location::{FileStore, LocationCache, LocationDescriptor};
use crate::rank::{filter_and_rank, FilterSpec, RadiusFilter};

/// Caller parameters, as given. See [`EventQuery::validate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    pub location: String,
    pub category: Option<String>,
    pub radius_km: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub from: Option<DateTime<FixedOffset>>,
    pub to: Option<DateTime<FixedOffset>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 500,
        }
    }
}

/// A query that passed validation, with its cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidQuery {
    pub location: String,
    pub category: Option<String>,
    pub filter: FilterSpec,
    pub limit: usize,
    pub cache_key: String,
}

impl EventQuery {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self, limits: &QueryLimits) -> Result<ValidQuery, QueryError> {
        let location = self.location.split_whitespace().collect::<Vec<_>>().join(" ");
        if location.is_empty() {
            return Err(invalid("location must not be empty"));
        }

        if let Some(lat) = self.lat {
            if !(lat.is_finite() && (-90.0..=90.0).contains(&lat)) {
                return Err(invalid(format!("lat {lat} out of range")));
            }
        }
        if let Some(lon) = self.lon {
            if !(lon.is_finite() && (-180.0..=180.0).contains(&lon)) {
                return Err(invalid(format!("lon {lon} out of range")));
            }
        }

        let radius = match self.radius_km {
            None => None,
            Some(r) if !(r.is_finite() && r > 0.0) => {
                return Err(invalid("radius_km must be a positive number"));
            }
            Some(r) => match (self.lat, self.lon) {
                (Some(lat), Some(lon)) if valid_lat_lon(lat, lon) => Some(RadiusFilter {
                    lat,
                    lon,
                    radius_km: r,
                }),
                _ => return Err(invalid("radius_km requires both lat and lon")),
            },
        };

        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(invalid("from must not be after to"));
            }
        }

        let limit = match self.limit {
            Some(0) => return Err(invalid("limit must be at least 1")),
            Some(n) => n.min(limits.max_limit),
            None => limits.default_limit,
        };

        let category = self
            .category
            .as_deref()
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty());

        let filter = FilterSpec {
            radius,
            category: category.clone(),
            from: self.from,
            to: self.to,
            limit: Some(limit),
        };
        let cache_key = canonical_key(&location, &filter);

        Ok(ValidQuery {
            location,
            category,
            filter,
            limit,
            cache_key,
        })
    }
}

fn invalid(msg: impl Into<String>) -> QueryError {
    QueryError::InvalidParams(msg.into())
}

fn canonical_key(location: &str, f: &FilterSpec) -> String {
    let radius = f
        .radius
        .map(|r| format!("{:.5},{:.5},{:.3}", r.lat, r.lon, r.radius_km))
        .unwrap_or_default();
    let ts = |d: Option<DateTime<FixedOffset>>| d.map(|d| d.timestamp().to_string()).unwrap_or_default();
    format!(
        "loc={}|r={}|cat={}|from={}|to={}|n={}",
        location.to_lowercase(),
        radius,
        f.category.as_deref().unwrap_or(""),
        ts(f.from),
        ts(f.to),
        f.limit.unwrap_or(0)
    )
}

/// Parse a date-window bound. A bare `YYYY-MM-DD` upper bound covers the whole day.
pub fn parse_window_bound(raw: &str, upper: bool) -> Result<DateTime<FixedOffset>, QueryError> {
    let s = raw.trim();
    if upper {
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            if let Some(end) = date.and_hms_opt(23, 59, 59) {
                return Ok(Utc.from_utc_datetime(&end).fixed_offset());
            }
        }
    }
    parse_start_time(s).ok_or_else(|| invalid(format!("unparseable date '{s}'")))
}

/// Per-source summary folded into an [`AggregateResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStats {
    pub outcome: RunOutcome,
    pub raw_count: usize,
    pub normalized_count: usize,
    /// Events of this source that survived cross-source deduplication.
    pub kept_count: usize,
    pub elapsed_ms: u64,
}

impl Default for SourceStats {
    fn default() -> Self {
        Self {
            outcome: RunOutcome::Success,
            raw_count: 0,
            normalized_count: 0,
            kept_count: 0,
            elapsed_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub events: Vec<CanonicalEvent>,
    pub per_source_stats: BTreeMap<String, SourceStats>,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationDescriptor>,
}

impl AggregateResult {
    pub fn empty() -> Self {
        Self {
            events: Vec::new(),
            per_source_stats: BTreeMap::new(),
            generated_at: Utc::now(),
            location: None,
        }
    }
}

/// Dedup across sources in the order the runs completed, then filter and rank.
pub fn fold_runs(runs: Vec<SourceRunResult>, filter: &FilterSpec) -> AggregateResult {
    let mut dedup = Deduplicator::new();
    let mut stats = BTreeMap::new();
    let mut events = Vec::new();

    for run in runs {
        let normalized_count = run.events.len();
        let mut kept_count = 0usize;
        for ev in run.events {
            if dedup.admit(&ev) {
                kept_count += 1;
                events.push(ev);
            }
        }
        stats.insert(
            run.source_name,
            SourceStats {
                outcome: run.outcome,
                raw_count: run.raw_count,
                normalized_count,
                kept_count,
                elapsed_ms: run.elapsed.as_millis() as u64,
            },
        );
    }
    counter!("dedup_dropped_total").increment(dedup.dropped() as u64);

    AggregateResult {
        events: filter_and_rank(events, filter),
        per_source_stats: stats,
        generated_at: Utc::now(),
        location: None,
    }
}

/// Everything a query needs, built once at start-up and shared by reference.
pub struct Aggregator {
    engine: FanoutEngine,
    locations: Arc<LocationCache>,
    cache: AggregateCache,
    limits: QueryLimits,
    country_hint: Option<String>,
}

impl Aggregator {
    pub fn new(engine: FanoutEngine, locations: Arc<LocationCache>, cache: AggregateCache) -> Self {
        ensure_metrics_described();
        Self {
            engine,
            locations,
            cache,
            limits: QueryLimits::default(),
            country_hint: None,
        }
    }

    /// Wire registry, enrichment provider, file-backed location cache and result cache.
    pub fn from_config(cfg: &AggregatorConfig) -> Self {
        let allowlist = load_allowlist().unwrap_or_else(|e| {
            warn!(target: "aggregate", error = %e, "source allowlist unreadable, admitting all sources");
            Default::default()
        });
        let registry = SourceRegistry::from_config(cfg).with_allowlist(allowlist);
        let engine = FanoutEngine::from_registry(&registry, cfg);
        let locations = Arc::new(LocationCache::open(
            build_provider(&cfg.enrichment),
            Arc::new(FileStore::new(cfg.location_cache_path.clone())),
        ));
        let cache = AggregateCache::new(cfg.aggregate_cache_ttl(), cfg.aggregate_cache_max_entries);

        Self::new(engine, locations, cache)
            .with_limits(QueryLimits {
                default_limit: cfg.default_limit,
                max_limit: cfg.max_limit,
            })
            .with_country_hint(cfg.default_country_hint.clone())
    }

    pub fn with_limits(mut self, limits: QueryLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_country_hint(mut self, hint: Option<String>) -> Self {
        self.country_hint = hint;
        self
    }

    pub fn limits(&self) -> QueryLimits {
        self.limits
    }

    pub fn locations(&self) -> &LocationCache {
        &self.locations
    }

    pub fn source_names(&self) -> Vec<String> {
        self.engine.source_names()
    }

    /// Batch query. Identical queries within the TTL return the stored result
    /// unchanged, stats and `generated_at` included.
    pub async fn aggregate(&self, query: &EventQuery) -> Result<AggregateResult, QueryError> {
        let valid = query.validate(&self.limits)?;
        let (result, hit) = self
            .cache
            .get_or_compute(&valid.cache_key, || self.compute(&valid))
            .await;
        info!(
            target: "aggregate",
            location = %valid.location,
            events = result.events.len(),
            sources = result.per_source_stats.len(),
            cache_hit = hit,
            "aggregate served"
        );
        Ok(result)
    }

    async fn compute(&self, valid: &ValidQuery) -> AggregateResult {
        let descriptor = self
            .locations
            .resolve(&valid.location, self.country_hint.as_deref())
            .await;
        let runs = self.engine.run_all(self.fetch_query(valid, descriptor.clone())).await;
        let mut result = fold_runs(runs, &valid.filter);
        result.location = Some(descriptor);
        result
    }

    /// Streaming variant: one [`SourceRunResult`] per source as each completes.
    /// Not cached; nothing is deduplicated across sources here.
    pub fn aggregate_stream(
        &self,
        query: &EventQuery,
    ) -> Result<impl Stream<Item = SourceRunResult> + Send + 'static, QueryError> {
        let valid = query.validate(&self.limits)?;
        let engine = self.engine.clone();
        let locations = self.locations.clone();
        let hint = self.country_hint.clone();
        let base = self.fetch_query(&valid, LocationDescriptor::identity(&valid.location));

        Ok(async_stream::stream! {
            let descriptor = locations.resolve(&valid.location, hint.as_deref()).await;
            let fq = FetchQuery { descriptor: Some(descriptor), ..base };
            let runs = engine.run_streaming(fq);
            futures::pin_mut!(runs);
            while let Some(run) = runs.next().await {
                yield run;
            }
        })
    }

    /// Sources are asked for up to `max_limit` so filtering still has material to
    /// work with; the caller's limit is applied after ranking.
    fn fetch_query(&self, valid: &ValidQuery, descriptor: LocationDescriptor) -> FetchQuery {
        FetchQuery {
            location: valid.location.clone(),
            category: valid.category.clone(),
            limit: self.limits.max_limit,
            descriptor: Some(descriptor),
        }
    }
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        crate::ingest::ensure_metrics_described();
        describe_counter!("location_cache_hits_total", "Location lookups served from cache.");
        describe_counter!(
            "location_cache_misses_total",
            "Location lookups that went to the enrichment provider."
        );
        describe_counter!("aggregate_cache_hits_total", "Queries served from the result cache.");
        describe_counter!("aggregate_cache_misses_total", "Queries that ran the full fan-out.");
    });
}
