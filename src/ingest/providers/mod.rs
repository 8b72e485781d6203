pub mod json_feed;
pub mod rss_feed;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};

use crate::config::{FeedConfig, FeedKind};
use crate::ingest::registry::SourceHandle;

/// Build the concrete source for one `[[feeds]]` entry.
pub fn build_feed(feed: &FeedConfig) -> anyhow::Result<SourceHandle> {
    let source: SourceHandle = match feed.kind {
        FeedKind::Rss => Arc::new(rss_feed::RssEventFeed::from_config(feed)?),
        FeedKind::Json => Arc::new(json_feed::JsonEventFeed::from_config(feed)?),
    };
    Ok(source)
}

/// Where a feed's bytes come from.
pub(crate) enum FeedOrigin {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl FeedOrigin {
    pub(crate) fn from_config(feed: &FeedConfig) -> anyhow::Result<Self> {
        if let Some(path) = &feed.fixture_path {
            let body = std::fs::read_to_string(path)
                .with_context(|| format!("reading fixture {} for {}", path.display(), feed.name))?;
            return Ok(FeedOrigin::Fixture(body));
        }
        match feed.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(FeedOrigin::Http {
                url: url.to_string(),
                client: http_client()?,
            }),
            _ => Err(anyhow!("feed {} has neither url nor fixture_path", feed.name)),
        }
    }
}

pub(crate) fn http_client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent("event-aggregator/0.1")
        .connect_timeout(Duration::from_secs(4))
        .timeout(Duration::from_secs(15))
        .build()?)
}
