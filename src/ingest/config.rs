// src/ingest/config.rs
//! Where the source allowlist comes from.
//!
//! Lookup order: `$INGEST_SOURCES_PATH`, then `config/sources.toml`, then
//! `config/sources.json`. No file at all means every registered source is allowed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::registry::SourceAllowlist;

pub const ENV_SOURCES_PATH: &str = "INGEST_SOURCES_PATH";
const CANDIDATES: [&str; 2] = ["config/sources.toml", "config/sources.json"];

/// Either `sources = [...]` (TOML or JSON object) or a bare JSON array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AllowlistFile {
    Table { sources: Vec<String> },
    List(Vec<String>),
}

impl AllowlistFile {
    fn into_allowlist(self) -> SourceAllowlist {
        match self {
            Self::Table { sources } | Self::List(sources) => SourceAllowlist::new(sources),
        }
    }
}

/// Allowlist for the current working directory.
pub fn load_allowlist() -> Result<SourceAllowlist> {
    load_allowlist_in(Path::new("."))
}

/// Allowlist resolved against `base`. An env path that does not exist is an error,
/// not a silent fallback.
pub fn load_allowlist_in(base: &Path) -> Result<SourceAllowlist> {
    match allowlist_path(base)? {
        Some(path) => read_allowlist(&path),
        None => Ok(SourceAllowlist::default()),
    }
}

fn allowlist_path(base: &Path) -> Result<Option<PathBuf>> {
    if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
        let path = PathBuf::from(p);
        if !path.exists() {
            bail!("{ENV_SOURCES_PATH} points to missing file {}", path.display());
        }
        return Ok(Some(path));
    }
    Ok(CANDIDATES.iter().map(|c| base.join(c)).find(|p| p.exists()))
}

pub fn read_allowlist(path: &Path) -> Result<SourceAllowlist> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading source allowlist {}", path.display()))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let file: AllowlistFile = if ext.eq_ignore_ascii_case("toml") {
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
    } else {
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
    };
    Ok(file.into_allowlist())
}
