//! Location enrichment: expand a narrow place name into a descriptor with nearby
//! larger localities, so sources that only index major cities stay queryable.

pub mod cache;
pub mod provider;
pub mod store;

pub use cache::LocationCache;
pub use provider::{EnrichmentProvider, Expansion};
pub use store::{CacheDocument, DescriptorStore, FileStore, MemoryStore};

use serde::{Deserialize, Serialize};

/// Expanded location. Immutable once written to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationDescriptor {
    pub original_query: String,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub nearby_localities: Vec<String>,
    #[serde(default)]
    pub needs_expansion: bool,
}

impl LocationDescriptor {
    /// Fallback used when enrichment is unavailable: the query stands for itself.
    pub fn identity(raw: &str) -> Self {
        Self {
            original_query: raw.to_string(),
            city: raw.trim().to_string(),
            state: None,
            country: None,
            nearby_localities: Vec::new(),
            needs_expansion: false,
        }
    }
}

/// Cache key: trimmed, lowercased, whitespace-collapsed location plus the country hint.
pub fn cache_key(raw: &str, hint_country: Option<&str>) -> String {
    let loc = collapse_ws(raw).to_lowercase();
    match hint_country.map(collapse_ws).filter(|h| !h.is_empty()) {
        Some(h) => format!("{loc}|{}", h.to_lowercase()),
        None => loc,
    }
}

/// Bring a locality string into "locality, region, country" shape, filling the
/// missing trailing parts from the descriptor being built.
pub fn normalize_locality(raw: &str, state: Option<&str>, country: Option<&str>) -> Option<String> {
    let mut parts: Vec<String> = raw
        .split(',')
        .map(collapse_ws)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return None;
    }

    let state = state.map(collapse_ws).filter(|s| !s.is_empty());
    let country = country.map(collapse_ws).filter(|c| !c.is_empty());

    match parts.len() {
        1 => parts.extend(state.into_iter().chain(country)),
        // Nearby localities share our country: "locality, country" gains the region,
        // anything else two-part is "locality, region" and gains the country.
        2 => {
            let second_is = |v: Option<&str>| v.is_some_and(|x| parts[1].eq_ignore_ascii_case(x));
            if second_is(country.as_deref()) {
                if let Some(s) = state.filter(|s| !second_is(Some(s.as_str()))) {
                    parts.insert(1, s);
                }
            } else {
                parts.extend(country);
            }
        }
        _ => {}
    }
    Some(parts.join(", "))
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
