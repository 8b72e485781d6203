pub mod aggregator;
pub mod enrichment;

pub use aggregator::{AggregatorConfig, FeedConfig, FeedKind};
pub use enrichment::EnrichmentConfig;
