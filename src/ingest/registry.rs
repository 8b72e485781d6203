// src/ingest/registry.rs
//! Start-up-time source registry: name → constructor.
//!
//! Adding a source means registering one more constructor; the engine never
//! learns how many sources exist or what they are.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::AggregatorConfig;
use crate::ingest::providers;
use crate::ingest::types::SourceProvider;

pub type SourceHandle = Arc<dyn SourceProvider>;
pub type SourceConstructor = Arc<dyn Fn() -> anyhow::Result<SourceHandle> + Send + Sync>;

/// Source names `discover()` may construct, compared case-insensitively.
/// Empty admits every registered source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceAllowlist(BTreeSet<String>);

impl SourceAllowlist {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            names
                .into_iter()
                .map(|n| n.as_ref().trim().to_ascii_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        )
    }

    pub fn admits_all(&self) -> bool {
        self.0.is_empty()
    }

    pub fn admits(&self, name: &str) -> bool {
        self.admits_all() || self.0.contains(&name.trim().to_ascii_lowercase())
    }

    /// Lowercased, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

#[derive(Clone, Default)]
pub struct SourceRegistry {
    constructors: BTreeMap<String, SourceConstructor>,
    allowlist: SourceAllowlist,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated from the `[[feeds]]` initialization list.
    pub fn from_config(cfg: &AggregatorConfig) -> Self {
        let mut reg = Self::new();
        for feed in &cfg.feeds {
            let feed = feed.clone();
            reg.register(feed.name.clone(), move || providers::build_feed(&feed));
        }
        reg
    }

    /// Only sources named here are constructed by `discover()`; empty admits all.
    pub fn with_allowlist(mut self, allowlist: SourceAllowlist) -> Self {
        for wanted in allowlist.names() {
            if !self.constructors.keys().any(|k| k.eq_ignore_ascii_case(wanted)) {
                warn!(target: "registry", source = wanted, "allowlisted source is not registered");
            }
        }
        self.allowlist = allowlist;
        self
    }

    /// Idempotent: a name that is already registered keeps its first constructor.
    /// Returns `true` when the name was new.
    pub fn register<F>(&mut self, name: impl Into<String>, ctor: F) -> bool
    where
        F: Fn() -> anyhow::Result<SourceHandle> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.constructors.contains_key(&name) {
            debug!(target: "registry", source = %name, "source already registered");
            return false;
        }
        self.constructors.insert(name, Arc::new(ctor));
        true
    }

    /// Register an already-built source under its own name.
    pub fn register_instance(&mut self, source: SourceHandle) -> bool {
        let name = source.name().to_string();
        self.register(name, move || Ok(source.clone()))
    }

    pub fn names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    /// Construct every allowed source. A constructor failure omits that source with a
    /// warning and never stops the rest. No ordering guarantee for callers.
    pub fn discover(&self) -> Vec<SourceHandle> {
        let mut out = Vec::with_capacity(self.constructors.len());
        for (name, ctor) in &self.constructors {
            if !self.allowlist.admits(name) {
                debug!(target: "registry", source = %name, "source not in allowlist, skipped");
                continue;
            }
            match ctor() {
                Ok(source) => {
                    if source.name() != name.as_str() {
                        warn!(
                            target: "registry",
                            registered = %name,
                            reported = source.name(),
                            "source reports a different name than it was registered under"
                        );
                    }
                    out.push(source);
                }
                Err(e) => {
                    warn!(target: "registry", source = %name, error = %e, "source failed to construct, omitted");
                }
            }
        }
        info!(
            target: "registry",
            registered = self.constructors.len(),
            discovered = out.len(),
            "sources discovered"
        );
        out
    }
}
