// src/lib.rs
// Public library surface for integration tests (and the binary).

pub mod aggregator;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod ingest;
pub mod location;
pub mod metrics;
pub mod rank;

// ---- Re-exports for stable public API ----
pub use crate::aggregator::{AggregateResult, Aggregator, EventQuery, SourceStats};
pub use crate::api::create_router;
pub use crate::config::AggregatorConfig;
pub use crate::error::{EnrichmentError, FetchError, QueryError, StoreError};
pub use crate::ingest::{FanoutEngine, RunOutcome, SourceRunResult};

use std::sync::Arc;

use shuttle_axum::axum::Router;
use tracing::info;

/// Build the full HTTP app from an already-loaded config.
pub fn app_from_config(cfg: &AggregatorConfig) -> Router {
    let aggregator = Arc::new(Aggregator::from_config(cfg));
    info!(
        sources = ?aggregator.source_names(),
        cached_locations = aggregator.locations().len(),
        "aggregator ready"
    );
    create_router(aggregator)
}

/// Load `config/aggregator.toml` (or `$AGGREGATOR_CONFIG_PATH`) and build the app.
pub fn app() -> anyhow::Result<Router> {
    let cfg = AggregatorConfig::load_default()?;
    Ok(app_from_config(&cfg))
}
