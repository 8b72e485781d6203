//! Location enrichment cache: in-memory map mirrored to a [`DescriptorStore`].
//!
//! Hits only take the map's read lock. Misses go through one async mutex that
//! covers provider call, insert and flush, so each distinct (location, hint)
//! pair reaches the provider at most once per process.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::provider::{DynEnrichment, Expansion};
use super::store::{CacheDocument, DescriptorStore, CACHE_DOCUMENT_VERSION};
use super::{cache_key, normalize_locality, LocationDescriptor};

pub struct LocationCache {
    provider: DynEnrichment,
    store: Arc<dyn DescriptorStore>,
    entries: RwLock<HashMap<String, LocationDescriptor>>,
    write_lock: Mutex<()>,
}

impl LocationCache {
    /// Load everything the store holds. An unreadable store starts empty with a warning.
    pub fn open(provider: DynEnrichment, store: Arc<dyn DescriptorStore>) -> Self {
        let entries = match store.load() {
            Ok(doc) => {
                if doc.version != CACHE_DOCUMENT_VERSION {
                    warn!(
                        target: "location_cache",
                        version = doc.version,
                        "unexpected cache document version, loading anyway"
                    );
                }
                doc.enrichments.into_iter().collect()
            }
            Err(e) => {
                warn!(
                    target: "location_cache",
                    store = %store.describe(),
                    error = %e,
                    "location cache unreadable, starting empty"
                );
                HashMap::new()
            }
        };
        info!(
            target: "location_cache",
            entries = entries.len(),
            provider = provider.name(),
            store = %store.describe(),
            "location cache loaded"
        );
        Self {
            provider,
            store,
            entries: RwLock::new(entries),
            write_lock: Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn store_description(&self) -> String {
        self.store.describe()
    }

    /// Cached descriptor, without ever calling the provider.
    pub fn get(&self, raw: &str, hint_country: Option<&str>) -> Option<LocationDescriptor> {
        self.lookup(&cache_key(raw, hint_country))
    }

    /// All cached descriptors keyed by cache key.
    pub fn snapshot(&self) -> BTreeMap<String, LocationDescriptor> {
        self.read_entries()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Cached descriptor on hit; one provider call on miss. Never fails:
    /// provider trouble yields an identity descriptor (not cached).
    pub async fn resolve(&self, raw: &str, hint_country: Option<&str>) -> LocationDescriptor {
        let key = cache_key(raw, hint_country);
        if let Some(hit) = self.lookup(&key) {
            counter!("location_cache_hits_total").increment(1);
            debug!(target: "location_cache", %key, "hit");
            return hit;
        }

        let _guard = self.write_lock.lock().await;
        // Another caller may have filled it while we waited.
        if let Some(hit) = self.lookup(&key) {
            counter!("location_cache_hits_total").increment(1);
            return hit;
        }
        counter!("location_cache_misses_total").increment(1);
        self.enrich_and_store(key, raw, hint_country).await
    }

    /// Explicit re-enrichment: bypasses the cached value and replaces it on success.
    /// On provider failure the existing entry (if any) is kept and returned.
    pub async fn refresh(&self, raw: &str, hint_country: Option<&str>) -> LocationDescriptor {
        let key = cache_key(raw, hint_country);
        let _guard = self.write_lock.lock().await;
        match self.provider.expand(raw, hint_country).await {
            Ok(exp) => self.insert_and_flush(key, build_descriptor(raw, exp)).await,
            Err(e) => {
                warn!(target: "location_cache", location = raw, error = %e, "re-enrichment failed");
                self.lookup(&key)
                    .unwrap_or_else(|| LocationDescriptor::identity(raw))
            }
        }
    }

    async fn enrich_and_store(
        &self,
        key: String,
        raw: &str,
        hint_country: Option<&str>,
    ) -> LocationDescriptor {
        match self.provider.expand(raw, hint_country).await {
            Ok(exp) => self.insert_and_flush(key, build_descriptor(raw, exp)).await,
            Err(e) => {
                warn!(
                    target: "location_cache",
                    location = raw,
                    provider = self.provider.name(),
                    error = %e,
                    "enrichment unavailable, using identity expansion"
                );
                LocationDescriptor::identity(raw)
            }
        }
    }

    /// Caller must hold `write_lock`. The file write runs on the blocking pool.
    async fn insert_and_flush(&self, key: String, descriptor: LocationDescriptor) -> LocationDescriptor {
        let doc = {
            let mut map = self.entries.write().unwrap_or_else(|p| p.into_inner());
            map.insert(key.clone(), descriptor.clone());
            CacheDocument {
                version: CACHE_DOCUMENT_VERSION,
                last_updated: Utc::now(),
                enrichments: map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            }
        };
        let store = Arc::clone(&self.store);
        let saved = tokio::task::spawn_blocking(move || store.save(&doc)).await;
        let failure = match saved {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(format!("persist task: {e}")),
        };
        if let Some(error) = failure {
            warn!(
                target: "location_cache",
                store = %self.store.describe(),
                %error,
                "failed to persist location cache, keeping in memory"
            );
        }
        info!(
            target: "location_cache",
            %key,
            nearby = descriptor.nearby_localities.len(),
            "location enriched"
        );
        descriptor
    }

    fn lookup(&self, key: &str) -> Option<LocationDescriptor> {
        self.read_entries().get(key).cloned()
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, LocationDescriptor>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }
}

/// Turn a provider answer into a descriptor with consistently shaped localities.
pub fn build_descriptor(raw: &str, exp: Expansion) -> LocationDescriptor {
    let city = match exp.city.trim() {
        "" => raw.trim().to_string(),
        c => c.to_string(),
    };
    let state = exp.state.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let country = exp.country.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());

    let own = normalize_locality(&city, state.as_deref(), country.as_deref());
    let mut nearby: Vec<String> = Vec::with_capacity(exp.nearby_localities.len());
    for loc in &exp.nearby_localities {
        let Some(n) = normalize_locality(loc, state.as_deref(), country.as_deref()) else {
            continue;
        };
        let is_self = own.as_deref().is_some_and(|o| o.eq_ignore_ascii_case(&n));
        if !is_self && !nearby.iter().any(|x| x.eq_ignore_ascii_case(&n)) {
            nearby.push(n);
        }
    }

    let needs_expansion = exp.needs_expansion.unwrap_or(!nearby.is_empty());
    LocationDescriptor {
        original_query: raw.to_string(),
        city,
        state,
        country,
        nearby_localities: nearby,
        needs_expansion,
    }
}
