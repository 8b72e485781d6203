// src/rank.rs
//! Filter & rank: radius, category, date window, then chronological order and limit.

use chrono::{DateTime, FixedOffset};

use crate::ingest::types::CanonicalEvent;

const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Great-circle distance in kilometres.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadiusFilter {
    pub lat: f64,
    pub lon: f64,
    pub radius_km: f64,
}

impl RadiusFilter {
    pub fn admits(&self, ev: &CanonicalEvent) -> bool {
        ev.coordinates()
            .is_some_and(|c| haversine_km((self.lat, self.lon), c) <= self.radius_km)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec {
    pub radius: Option<RadiusFilter>,
    pub category: Option<String>,
    pub from: Option<DateTime<FixedOffset>>,
    pub to: Option<DateTime<FixedOffset>>,
    pub limit: Option<usize>,
}

impl FilterSpec {
    pub fn has_date_window(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    /// Every constraint except the limit.
    pub fn admits(&self, ev: &CanonicalEvent) -> bool {
        if let Some(r) = &self.radius {
            if !r.admits(ev) {
                return false;
            }
        }
        if let Some(cat) = &self.category {
            if ev.category != *cat {
                return false;
            }
        }
        if self.has_date_window() {
            let Some(start) = ev.start_time else {
                return false;
            };
            if self.from.is_some_and(|from| start < from) || self.to.is_some_and(|to| start > to) {
                return false;
            }
        }
        true
    }
}

/// Filter, order ascending by start time (undated last, input order kept among
/// equals), then truncate. Input order is the deduplicated first-seen order.
pub fn filter_and_rank(events: Vec<CanonicalEvent>, spec: &FilterSpec) -> Vec<CanonicalEvent> {
    let mut kept: Vec<CanonicalEvent> = events.into_iter().filter(|e| spec.admits(e)).collect();
    // sort_by_key is stable
    kept.sort_by_key(|e| (e.start_time.is_none(), e.start_time));
    if let Some(limit) = spec.limit {
        kept.truncate(limit);
    }
    kept
}
