use async_trait::async_trait;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;

use super::FeedOrigin;
use crate::config::FeedConfig;
use crate::error::FetchError;
use crate::ingest::types::{EventDraft, FetchQuery, RawRecord, SourceProvider};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "category", default)]
    categories: Vec<String>,
}

/// Event listing published as RSS 2.0. `pubDate` is read as the event start.
pub struct RssEventFeed {
    name: String,
    origin: FeedOrigin,
    default_category: Option<String>,
    default_venue: Option<String>,
}

impl RssEventFeed {
    pub fn from_config(feed: &FeedConfig) -> anyhow::Result<Self> {
        Ok(Self {
            name: feed.name.clone(),
            origin: FeedOrigin::from_config(feed)?,
            default_category: feed.default_category.clone(),
            default_venue: feed.default_venue.clone(),
        })
    }

    pub fn from_fixture_str(name: &str, s: &str) -> Self {
        Self {
            name: name.to_string(),
            origin: FeedOrigin::Fixture(s.to_string()),
            default_category: None,
            default_venue: None,
        }
    }

    fn parse_items_from_str(&self, s: &str, query: &FetchQuery) -> Result<Vec<RawRecord>, FetchError> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean)
            .map_err(|e| FetchError::Parse(format!("{} rss xml: {e}", self.name)))?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let categories: Vec<String> = it
                .categories
                .iter()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
            // Items without any category are kept; a filter needs something to reject.
            let category = match query.category.as_deref() {
                Some(wanted) if !categories.is_empty() => {
                    match categories.iter().find(|c| c.eq_ignore_ascii_case(wanted)) {
                        Some(hit) => Some(hit.clone()),
                        None => continue,
                    }
                }
                _ => categories.first().cloned(),
            };

            let mut rec = RawRecord::new();
            for (k, v) in [
                ("title", it.title),
                ("link", it.link),
                ("pub_date", it.pub_date),
                ("description", it.description),
                ("category", category),
            ] {
                if let Some(v) = v {
                    rec.insert(k, v);
                }
            }
            if categories.len() > 1 {
                rec.insert("categories", categories);
            }
            out.push(rec);
            if out.len() >= query.limit {
                break;
            }
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_parse_ms").record(ms);
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for RssEventFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<RawRecord>, FetchError> {
        match &self.origin {
            FeedOrigin::Fixture(s) => self.parse_items_from_str(s, query),
            FeedOrigin::Http { url, client } => {
                let resp = client.get(url).send().await.map_err(|e| {
                    counter!("ingest_provider_errors_total").increment(1);
                    FetchError::from(e)
                })?;
                if !resp.status().is_success() {
                    return Err(FetchError::Transport(format!("{url}: status {}", resp.status())));
                }
                let body = resp.text().await?;
                self.parse_items_from_str(&body, query)
            }
        }
    }

    fn map_record(&self, raw: &RawRecord) -> EventDraft {
        EventDraft {
            title: raw.text(&["title"]),
            start: raw.text(&["pub_date"]),
            venue_name: self.default_venue.clone(),
            category: raw.text(&["category"]).or_else(|| self.default_category.clone()),
            source_url: raw.text(&["link"]),
            external_id: raw.text(&["link"]),
            ..Default::default()
        }
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
