// src/ingest/types.rs
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FetchError;
use crate::location::LocationDescriptor;

/// Loosely-typed field mapping as produced by one source. No schema is implied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(pub Map<String, Value>);

impl RawRecord {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert, handy for adapters and tests.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// First non-empty value among `keys`, as text. Numbers and booleans are stringified.
    pub fn text(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| match self.0.get(*k)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    /// First numeric value among `keys`; numeric strings are accepted.
    pub fn number(&self, keys: &[&str]) -> Option<f64> {
        keys.iter().find_map(|k| match self.0.get(*k)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
    }

    /// First boolean among `keys`; "true"/"false"/"yes"/"no"/"1"/"0" strings are accepted.
    pub fn flag(&self, keys: &[&str]) -> Option<bool> {
        keys.iter().find_map(|k| match self.0.get(*k)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|x| x != 0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        })
    }

    /// Nested object under `key`, if any.
    pub fn nested(&self, key: &str) -> Option<RawRecord> {
        match self.0.get(key)? {
            Value::Object(m) => Some(RawRecord(m.clone())),
            _ => None,
        }
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(m: Map<String, Value>) -> Self {
        Self(m)
    }
}

/// What a source is asked for. The descriptor is attached when the location
/// could be resolved, so sources can broaden their own search scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchQuery {
    pub location: String,
    pub category: Option<String>,
    pub limit: usize,
    pub descriptor: Option<LocationDescriptor>,
}

impl FetchQuery {
    pub fn new(location: impl Into<String>, limit: usize) -> Self {
        Self {
            location: location.into(),
            category: None,
            limit,
            descriptor: None,
        }
    }

    /// The queried location followed by every nearby locality the descriptor knows about.
    pub fn search_localities(&self) -> Vec<String> {
        let mut out = vec![self.location.clone()];
        if let Some(d) = &self.descriptor {
            for loc in &d.nearby_localities {
                if !out.iter().any(|o| o.eq_ignore_ascii_case(loc)) {
                    out.push(loc.clone());
                }
            }
        }
        out
    }
}

/// Output of a source's mapping function: still unvalidated, still stringly.
/// The normalization stage turns it into a [`CanonicalEvent`] or drops it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventDraft {
    pub title: Option<String>,
    pub start: Option<String>,
    pub venue_name: Option<String>,
    pub venue_address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub category: Option<String>,
    pub price: Option<String>,
    pub currency: Option<String>,
    pub is_free: Option<bool>,
    pub source_url: Option<String>,
    pub external_id: Option<String>,
}

/// The single record shape every source is normalized into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub title: String,
    pub start_time: Option<DateTime<FixedOffset>>,
    pub venue_name: String,
    pub venue_address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub category: String,
    pub price: Option<Decimal>,
    pub currency: String,
    pub is_free: bool,
    pub source_name: String,
    pub source_url: Option<String>,
    pub external_id: Option<String>,
}

impl CanonicalEvent {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

/// The fetch contract every source implements. The engine treats all
/// implementations uniformly and knows nothing about how they extract data.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Stable, unique name; used as the key in per-source stats.
    fn name(&self) -> &str;

    /// "No results" is `Ok(vec![])`; only transport/parse trouble is an error.
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<RawRecord>, FetchError>;

    /// Source-specific mapping into the canonical shape. Defaults to the common field names.
    fn map_record(&self, raw: &RawRecord) -> EventDraft {
        crate::ingest::normalize::map_common_fields(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_skips_blank_and_stringifies_numbers() {
        let r = RawRecord::new()
            .with("title", "   ")
            .with("name", "Tango night")
            .with("id", json!(42));
        assert_eq!(r.text(&["title", "name"]).as_deref(), Some("Tango night"));
        assert_eq!(r.text(&["id"]).as_deref(), Some("42"));
        assert_eq!(r.text(&["missing"]), None);
    }

    #[test]
    fn number_and_flag_accept_strings() {
        let r = RawRecord::new()
            .with("lat", "-34.65")
            .with("free", "yes")
            .with("paid", json!(0));
        assert_eq!(r.number(&["lat"]), Some(-34.65));
        assert_eq!(r.flag(&["free"]), Some(true));
        assert_eq!(r.flag(&["paid"]), Some(false));
    }

    #[test]
    fn search_localities_appends_nearby_without_duplicates() {
        let mut q = FetchQuery::new("Moreno", 10);
        q.descriptor = Some(LocationDescriptor {
            original_query: "Moreno".into(),
            city: "Moreno".into(),
            state: Some("Buenos Aires".into()),
            country: Some("Argentina".into()),
            nearby_localities: vec!["moreno".into(), "Merlo, Buenos Aires, Argentina".into()],
            needs_expansion: true,
        });
        assert_eq!(
            q.search_localities(),
            vec!["Moreno".to_string(), "Merlo, Buenos Aires, Argentina".to_string()]
        );
    }
}
