// src/ingest/normalize.rs
//! Normalization stage: raw per-source records → [`CanonicalEvent`].
//!
//! Mapping lives with each source (`SourceProvider::map_record`); this stage only
//! invokes it and enforces the output invariants. Nothing here returns an error:
//! invalid records are counted and dropped.

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use rust_decimal::Decimal;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};
use tracing::debug;

use crate::ingest::types::{CanonicalEvent, EventDraft, RawRecord, SourceProvider};

const TITLE_MAX_CHARS: usize = 300;
const DEFAULT_CATEGORY: &str = "general";
const DEFAULT_CURRENCY: &str = "USD";

/// Why a record did not make it through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    MissingTitle,
    UnparseableDate(String),
}

/// Result of normalizing one source's batch.
#[derive(Debug, Clone, Default)]
pub struct NormalizeOutcome {
    pub events: Vec<CanonicalEvent>,
    pub dropped: usize,
}

/// Normalize text: decode entities, strip tags, unify quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > TITLE_MAX_CHARS {
        out = out.chars().take(TITLE_MAX_CHARS).collect::<String>().trim_end().to_string();
    }
    out
}

/// Parse the date formats sources actually emit. Naive values are taken as UTC.
pub fn parse_start_time(raw: &str) -> Option<DateTime<FixedOffset>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }

    if let Ok(odt) = OffsetDateTime::parse(s, &Rfc2822) {
        let offset = FixedOffset::east_opt(odt.offset().whole_seconds())?;
        return DateTime::from_timestamp(odt.unix_timestamp(), odt.nanosecond())
            .map(|utc| utc.with_timezone(&offset));
    }

    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive).fixed_offset());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Some(Utc.from_utc_datetime(&naive).fixed_offset());
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
        let secs = s.parse::<i64>().ok()?;
        return DateTime::from_timestamp(secs, 0).map(|dt| dt.fixed_offset());
    }

    None
}

/// Prices as listings write them: "12.50", "$12", "ARS 3.000,00", "1,500.50", "free".
///
/// The last `.` or `,` is the decimal mark only when one or two digits follow it;
/// every other separator is a thousands grouping.
pub fn parse_price(raw: &str) -> Option<Decimal> {
    let s = raw.trim();
    if s.eq_ignore_ascii_case("free") || s.eq_ignore_ascii_case("gratis") {
        return Some(Decimal::ZERO);
    }

    let first_digit = s.find(|c: char| c.is_ascii_digit())?;
    if s[..first_digit].contains('-') {
        return None;
    }
    let body: String = s[first_digit..]
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    let decimal_mark = body
        .rfind(['.', ','])
        .filter(|&i| (1..=2).contains(&(body.len() - i - 1)));
    let cleaned: String = body
        .char_indices()
        .filter_map(|(i, c)| match c {
            '.' | ',' if Some(i) == decimal_mark => Some('.'),
            '.' | ',' => None,
            d => Some(d),
        })
        .collect();

    Decimal::from_str(&cleaned).ok()
}

/// Default mapping over the field names most listing sources use.
pub fn map_common_fields(raw: &RawRecord) -> EventDraft {
    let venue = raw.nested("venue");
    let venue_text = |keys: &[&str]| venue.as_ref().and_then(|v| v.text(keys));
    let venue_number = |keys: &[&str]| venue.as_ref().and_then(|v| v.number(keys));

    EventDraft {
        title: raw.text(&["title", "name", "event_name"]),
        start: raw.text(&["start", "start_time", "startDate", "date", "datetime"]),
        venue_name: raw
            .text(&["venue_name", "location_name"])
            .or_else(|| venue_text(&["name"]))
            .or_else(|| raw.text(&["venue"])),
        venue_address: raw
            .text(&["venue_address", "address"])
            .or_else(|| venue_text(&["address"])),
        latitude: raw
            .number(&["lat", "latitude"])
            .or_else(|| venue_number(&["lat", "latitude"])),
        longitude: raw
            .number(&["lon", "lng", "longitude"])
            .or_else(|| venue_number(&["lon", "lng", "longitude"])),
        category: raw.text(&["category"]),
        price: raw.text(&["price"]),
        currency: raw.text(&["currency"]),
        is_free: raw.flag(&["is_free", "free"]),
        source_url: raw.text(&["url", "link"]),
        external_id: raw.text(&["id", "external_id"]),
    }
}

/// Enforce the canonical invariants on one draft.
pub fn normalize_draft(
    draft: EventDraft,
    source_name: &str,
) -> Result<CanonicalEvent, DropReason> {
    let title = draft
        .title
        .as_deref()
        .map(normalize_text)
        .unwrap_or_default();
    if title.is_empty() {
        return Err(DropReason::MissingTitle);
    }

    let start_time = match draft.start.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => {
            Some(parse_start_time(s).ok_or_else(|| DropReason::UnparseableDate(s.to_string()))?)
        }
        _ => None,
    };

    let (latitude, longitude) = match (draft.latitude, draft.longitude) {
        (Some(lat), Some(lon)) if valid_lat_lon(lat, lon) => (Some(lat), Some(lon)),
        _ => (None, None),
    };

    let price = draft.price.as_deref().and_then(parse_price);
    let is_free = draft
        .is_free
        .unwrap_or_else(|| price.is_some_and(|p| p.is_zero()));

    Ok(CanonicalEvent {
        title,
        start_time,
        venue_name: draft
            .venue_name
            .as_deref()
            .map(normalize_text)
            .unwrap_or_default(),
        venue_address: non_empty(draft.venue_address.as_deref().map(normalize_text)),
        latitude,
        longitude,
        category: non_empty(draft.category.map(|c| c.trim().to_ascii_lowercase()))
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        price,
        currency: non_empty(draft.currency.map(|c| c.trim().to_ascii_uppercase()))
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        is_free,
        source_name: source_name.to_string(),
        source_url: non_empty(draft.source_url),
        external_id: non_empty(draft.external_id),
    })
}

/// Run one source's mapping over its raw batch and keep only valid events.
pub fn normalize_records(source: &dyn SourceProvider, raws: &[RawRecord]) -> NormalizeOutcome {
    let mut out = NormalizeOutcome {
        events: Vec::with_capacity(raws.len()),
        dropped: 0,
    };
    for raw in raws {
        match normalize_draft(source.map_record(raw), source.name()) {
            Ok(ev) => out.events.push(ev),
            Err(reason) => {
                debug!(target: "normalize", source = source.name(), ?reason, "record dropped");
                out.dropped += 1;
            }
        }
    }
    out
}

pub(crate) fn valid_lat_lon(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}
