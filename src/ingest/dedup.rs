// src/ingest/dedup.rs
//! Cross-source deduplication by content fingerprint.
//!
//! First seen wins and fields are never merged. The fingerprint ignores category
//! and price, so two different events at the same venue on the same day with
//! titles that only differ in punctuation collapse into one.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ingest::types::CanonicalEvent;

/// Identity used to decide that two records describe the same real-world event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase, punctuation removed, whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    let stripped: String = title
        .chars()
        .filter(|c| !c.is_ascii_punctuation() && !is_typographic_punct(*c))
        .collect();
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn is_typographic_punct(c: char) -> bool {
    matches!(
        c,
        '\u{2018}' | '\u{2019}' | '\u{201C}' | '\u{201D}' | '\u{00AB}' | '\u{00BB}'
            | '\u{2013}' | '\u{2014}' | '\u{2026}' | '\u{00A1}' | '\u{00BF}'
    )
}

/// hash(normalized title + event-local date or "unknown" + lowercased venue).
pub fn fingerprint(ev: &CanonicalEvent) -> Fingerprint {
    let date = ev
        .start_time
        .map(|t| t.date_naive().format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let venue = ev.venue_name.trim().to_lowercase();

    let mut hasher = Sha256::new();
    hasher.update(normalize_title(&ev.title).as_bytes());
    hasher.update(b"|");
    hasher.update(date.as_bytes());
    hasher.update(b"|");
    hasher.update(venue.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    Fingerprint(out)
}

/// Streaming deduplicator: feed events in arrival order, keep the first of each fingerprint.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<Fingerprint>,
    dropped: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the event is new and should be kept.
    pub fn admit(&mut self, ev: &CanonicalEvent) -> bool {
        let keep = self.seen.insert(fingerprint(ev));
        if !keep {
            self.dropped += 1;
        }
        keep
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

/// Deduplicate a whole batch, preserving input order. Returns (kept, dropped).
pub fn dedup_events(events: Vec<CanonicalEvent>) -> (Vec<CanonicalEvent>, usize) {
    let mut d = Deduplicator::new();
    let kept: Vec<_> = events.into_iter().filter(|ev| d.admit(ev)).collect();
    (kept, d.dropped())
}
