// src/ingest/mod.rs
pub mod config;
pub mod dedup;
pub mod fanout;
pub mod normalize;
pub mod providers;
pub mod registry;
pub mod types;

use metrics::{describe_counter, describe_histogram};
use once_cell::sync::OnceCell;

pub use fanout::{FanoutEngine, RunOutcome, SourceRunResult};
pub use registry::{SourceAllowlist, SourceHandle, SourceRegistry};
pub use types::{CanonicalEvent, FetchQuery, RawRecord, SourceProvider};

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "fanout_source_runs_total",
            "Source runs by outcome (success, timeout, failed)."
        );
        describe_histogram!(
            "fanout_source_elapsed_ms",
            "Per-source fetch + normalize time in milliseconds."
        );
        describe_counter!(
            "fanout_events_raw_total",
            "Raw records returned by sources."
        );
        describe_counter!(
            "normalize_dropped_total",
            "Records dropped by normalization (no title, bad date)."
        );
        describe_counter!(
            "dedup_dropped_total",
            "Events collapsed by fingerprint deduplication."
        );
        describe_counter!(
            "ingest_provider_errors_total",
            "HTTP feed transport errors."
        );
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
    });
}
