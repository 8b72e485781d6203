//! Enrichment provider abstraction + the OpenAI-backed implementation.
//!
//! Providers are treated as slow and unreliable. Every failure mode collapses into
//! `EnrichmentError::Unavailable`; the cache decides what to do about it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EnrichmentConfig;
use crate::error::EnrichmentError;

/// What a provider knows about a place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expansion {
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub nearby_localities: Vec<String>,
    /// Provider's own opinion; when absent, "has nearby localities" is used.
    #[serde(default)]
    pub needs_expansion: Option<bool>,
}

#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    async fn expand(
        &self,
        location: &str,
        country_hint: Option<&str>,
    ) -> Result<Expansion, EnrichmentError>;

    fn name(&self) -> &'static str;
}

pub type DynEnrichment = Arc<dyn EnrichmentProvider>;

/// Build the provider named in config. Unknown or keyless setups fall back to disabled.
pub fn build_provider(cfg: &EnrichmentConfig) -> DynEnrichment {
    match cfg.provider.as_str() {
        "openai" if !cfg.api_key.is_empty() => {
            match OpenAiEnrichment::new(cfg.api_key.clone(), cfg.model.as_deref()) {
                Ok(p) => Arc::new(p),
                Err(e) => {
                    tracing::warn!(error = %e, "openai enrichment client could not be built");
                    Arc::new(DisabledEnrichment)
                }
            }
        }
        "openai" => {
            tracing::warn!("enrichment provider 'openai' configured without an api key");
            Arc::new(DisabledEnrichment)
        }
        _ => Arc::new(DisabledEnrichment),
    }
}

/// Always unavailable; every lookup degrades to an identity descriptor.
pub struct DisabledEnrichment;

#[async_trait]
impl EnrichmentProvider for DisabledEnrichment {
    async fn expand(&self, _: &str, _: Option<&str>) -> Result<Expansion, EnrichmentError> {
        Err(EnrichmentError::Unavailable("enrichment disabled".into()))
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// OpenAI chat-completions provider returning a strict JSON object.
pub struct OpenAiEnrichment {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiEnrichment {
    /// `model_override`: defaults to gpt-4o-mini.
    pub fn new(api_key: String, model_override: Option<&str>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("event-aggregator/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            api_key,
            model: model_override.unwrap_or("gpt-4o-mini").to_string(),
        })
    }
}

const SYSTEM_PROMPT: &str = "You expand a place name for an event search. Reply with ONE JSON object only: \
{\"city\": string, \"state\": string|null, \"country\": string|null, \
\"nearby_localities\": [\"Locality, Region, Country\", ...], \"needs_expansion\": bool}. \
nearby_localities lists up to 8 larger or neighbouring towns within ~50km, nearest first. \
needs_expansion is true when the place is small enough that event sites are unlikely to index it.";

#[async_trait]
impl EnrichmentProvider for OpenAiEnrichment {
    async fn expand(
        &self,
        location: &str,
        country_hint: Option<&str>,
    ) -> Result<Expansion, EnrichmentError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let user = match country_hint {
            Some(h) => format!("Place: {location}\nCountry hint: {h}"),
            None => format!("Place: {location}"),
        };
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.0,
            max_tokens: 400,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| EnrichmentError::Unavailable(format!("openai request: {e}")))?;

        if !resp.status().is_success() {
            return Err(EnrichmentError::Unavailable(format!(
                "openai status {}",
                resp.status()
            )));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| EnrichmentError::Unavailable(format!("openai body: {e}")))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");
        parse_expansion(content)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Parse a model reply; tolerates a fenced ```json block around the object.
pub fn parse_expansion(content: &str) -> Result<Expansion, EnrichmentError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    let exp: Expansion = serde_json::from_str(body)
        .map_err(|e| EnrichmentError::Unavailable(format!("unparseable expansion: {e}")))?;
    if exp.city.trim().is_empty() {
        return Err(EnrichmentError::Unavailable("expansion without a city".into()));
    }
    Ok(exp)
}
