//! Event Aggregator — Binary Entrypoint
//! Boots the Axum HTTP server: config, sources, location cache, metrics.

use event_aggregator::{app_from_config, metrics::Metrics, AggregatorConfig};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs filtered by `RUST_LOG` (default `event_aggregator=info,warn`).
/// Idempotent: a subscriber installed by the runtime wins.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("event_aggregator=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = AggregatorConfig::load_default()?;
    let metrics = Metrics::init(cfg.aggregate_cache_ttl_secs)?;

    let router = app_from_config(&cfg).merge(metrics.router());

    Ok(router.into())
}
