//! Error taxonomy shared by sources, the enrichment layer and the query API.
//!
//! Only [`QueryError`] ever reaches an `aggregate()` caller. Everything a source or
//! the enrichment provider raises is folded into a per-source outcome or a
//! degraded descriptor before it gets that far.

use std::time::Duration;

use thiserror::Error;

/// Raised by a source at its fetch boundary.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Transport(format!("request timed out: {err}"))
        } else if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// Raised by an enrichment provider; never escapes the location cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnrichmentError {
    #[error("enrichment unavailable: {0}")]
    Unavailable(String),
}

/// Persistence failures of the location cache document.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache file io: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache file format: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Caller-side mistakes detected before any source is dispatched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid query parameters: {0}")]
    InvalidParams(String),
}
