//! Storage backends for the location cache document.
//!
//! The document is small; every insertion rewrites it whole (temp file + rename).

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::LocationDescriptor;
use crate::error::StoreError;

pub const CACHE_DOCUMENT_VERSION: u32 = 1;

/// On-disk shape: `{version, last_updated, enrichments: {key -> descriptor}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheDocument {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub enrichments: BTreeMap<String, LocationDescriptor>,
}

impl Default for CacheDocument {
    fn default() -> Self {
        Self {
            version: CACHE_DOCUMENT_VERSION,
            last_updated: Utc::now(),
            enrichments: BTreeMap::new(),
        }
    }
}

pub trait DescriptorStore: Send + Sync {
    /// Full document; a missing backing file is an empty document, not an error.
    fn load(&self) -> Result<CacheDocument, StoreError>;
    fn save(&self, doc: &CacheDocument) -> Result<(), StoreError>;
    /// Human-readable location of the store (for diagnostics).
    fn describe(&self) -> String;
}

/// JSON file on local disk.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DescriptorStore for FileStore {
    fn load(&self) -> Result<CacheDocument, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(s) => Ok(serde_json::from_str(&s)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CacheDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, doc: &CacheDocument) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(doc)?;
        let mut f = fs::File::create(&tmp)?;
        f.write_all(json.as_bytes())?;
        f.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: Mutex<Option<CacheDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DescriptorStore for MemoryStore {
    fn load(&self) -> Result<CacheDocument, StoreError> {
        let g = self.doc.lock().unwrap_or_else(|p| p.into_inner());
        Ok(g.clone().unwrap_or_default())
    }

    fn save(&self, doc: &CacheDocument) -> Result<(), StoreError> {
        let mut g = self.doc.lock().unwrap_or_else(|p| p.into_inner());
        *g = Some(doc.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
