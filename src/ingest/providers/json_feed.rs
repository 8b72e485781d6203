// src/ingest/providers/json_feed.rs
use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;

use super::FeedOrigin;
use crate::config::FeedConfig;
use crate::error::FetchError;
use crate::ingest::normalize::map_common_fields;
use crate::ingest::types::{EventDraft, FetchQuery, RawRecord, SourceProvider};

/// JSON listing API (or a dump of one): a top-level array of event objects, or an
/// object wrapping it under `events`, `results`, `data` or `items`.
pub struct JsonEventFeed {
    name: String,
    origin: FeedOrigin,
    default_category: Option<String>,
}

impl JsonEventFeed {
    pub fn from_config(feed: &FeedConfig) -> anyhow::Result<Self> {
        Ok(Self {
            name: feed.name.clone(),
            origin: FeedOrigin::from_config(feed)?,
            default_category: feed.default_category.clone(),
        })
    }

    pub fn from_fixture_str(name: &str, content: &str) -> Self {
        Self {
            name: name.to_string(),
            origin: FeedOrigin::Fixture(content.to_string()),
            default_category: None,
        }
    }

    fn parse_listing(&self, body: &str, limit: usize) -> Result<Vec<RawRecord>, FetchError> {
        let t0 = std::time::Instant::now();
        let v: Value = serde_json::from_str(body)
            .map_err(|e| FetchError::Parse(format!("{} json: {e}", self.name)))?;

        let items = match v {
            Value::Array(items) => items,
            Value::Object(mut obj) => ["events", "results", "data", "items"]
                .iter()
                .find_map(|k| match obj.remove(*k) {
                    Some(Value::Array(items)) => Some(items),
                    _ => None,
                })
                .ok_or_else(|| FetchError::Parse(format!("{}: no event array in object", self.name)))?,
            other => {
                return Err(FetchError::Parse(format!(
                    "{}: unexpected top-level json {}",
                    self.name,
                    type_name(&other)
                )))
            }
        };

        let out: Vec<RawRecord> = items
            .into_iter()
            .filter_map(|it| match it {
                Value::Object(m) => Some(RawRecord::from(m)),
                _ => None,
            })
            .take(limit)
            .collect();

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_parse_ms").record(ms);
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for JsonEventFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<RawRecord>, FetchError> {
        match &self.origin {
            FeedOrigin::Fixture(s) => self.parse_listing(s, query.limit),
            FeedOrigin::Http { url, client } => {
                let mut params: Vec<(&str, String)> = vec![
                    ("location", query.location.clone()),
                    ("limit", query.limit.to_string()),
                ];
                if let Some(c) = &query.category {
                    params.push(("category", c.clone()));
                }
                // Sources that only index larger places can use the broadened scope.
                if query.descriptor.as_ref().is_some_and(|d| d.needs_expansion) {
                    for loc in query.search_localities().into_iter().skip(1) {
                        params.push(("near", loc));
                    }
                }

                let resp = client.get(url).query(&params).send().await.map_err(|e| {
                    counter!("ingest_provider_errors_total").increment(1);
                    FetchError::from(e)
                })?;
                if !resp.status().is_success() {
                    return Err(FetchError::Transport(format!("{url}: status {}", resp.status())));
                }
                let body = resp.text().await?;
                self.parse_listing(&body, query.limit)
            }
        }
    }

    fn map_record(&self, raw: &RawRecord) -> EventDraft {
        let mut d = map_common_fields(raw);
        if d.category.is_none() {
            d.category = self.default_category.clone();
        }
        d
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
