// src/config/enrichment.rs
use serde::{Deserialize, Serialize};
use std::env;

fn default_provider() -> String {
    "disabled".to_string()
}

/// `[enrichment]` table of `config/aggregator.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// "openai" | "disabled" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model override; provider default when absent.
    #[serde(default)]
    pub model: Option<String>,
    /// "ENV" means: read from OPENAI_API_KEY.
    #[serde(default)]
    pub api_key: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_key: String::new(),
        }
    }
}

impl EnrichmentConfig {
    /// Normalize provider name and resolve an `"ENV"` api key.
    /// A missing env var leaves the key empty (the provider then degrades to disabled).
    pub fn resolve(mut self) -> Self {
        self.provider = self.provider.trim().to_lowercase();
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = match self.provider.as_str() {
                "openai" => env::var("OPENAI_API_KEY").unwrap_or_default(),
                _ => String::new(),
            };
        }
        self.model = self.model.filter(|m| !m.trim().is_empty());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[serial_test::serial]
    #[test]
    fn env_key_is_resolved_per_provider() {
        env::set_var("OPENAI_API_KEY", "sk-test");
        let cfg = EnrichmentConfig {
            provider: " OpenAI ".into(),
            model: Some(" ".into()),
            api_key: "ENV".into(),
        }
        .resolve();
        assert_eq!(cfg.provider, "openai");
        assert_eq!(cfg.api_key, "sk-test");
        assert_eq!(cfg.model, None);
        env::remove_var("OPENAI_API_KEY");
    }

    #[test]
    fn explicit_key_is_kept() {
        let cfg = EnrichmentConfig {
            provider: "openai".into(),
            model: Some("gpt-4o".into()),
            api_key: "sk-inline".into(),
        }
        .resolve();
        assert_eq!(cfg.api_key, "sk-inline");
        assert_eq!(cfg.model.as_deref(), Some("gpt-4o"));
    }
}
