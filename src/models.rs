//! Provider and model catalog
//!
//! The backend routes a request by its `api_type`; each known model is bound
//! to exactly one provider. Image support is a provider capability.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ChatError;

/// Backend provider, sent as `api_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenRouter,
    OpenAi,
    Gemini,
}

/// Provider the auto-switch falls back to when images are attached
pub const IMAGE_PROVIDER: Provider = Provider::OpenAi;

impl Provider {
    pub fn all() -> &'static [Provider] {
        &[Provider::OpenRouter, Provider::OpenAi, Provider::Gemini]
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "openrouter",
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
        }
    }

    pub fn supports_images(&self) -> bool {
        matches!(self, Provider::OpenAi | Provider::Gemini)
    }

    /// First catalog entry for this provider
    pub fn default_model(&self) -> &'static str {
        CATALOG
            .iter()
            .find(|m| m.provider == *self)
            .map(|m| m.id)
            .unwrap_or(DEFAULT_MODEL)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Ok(Provider::OpenRouter),
            "openai" => Ok(Provider::OpenAi),
            "gemini" => Ok(Provider::Gemini),
            other => Err(ChatError::InvalidSetting(format!(
                "unknown provider '{}' (expected openrouter, openai or gemini)",
                other
            ))),
        }
    }
}

/// Model information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub provider: Provider,
}

impl ModelInfo {
    /// Get display name (shorter version for UI)
    pub fn display_name(&self) -> &'static str {
        // Drop the vendor prefix of routed ids like "deepseek/deepseek-r1:free"
        self.id.split('/').nth(1).unwrap_or(self.id)
    }
}

pub const DEFAULT_PROVIDER: Provider = Provider::OpenRouter;
pub const DEFAULT_MODEL: &str = "deepseek/deepseek-r1:free";

pub const CATALOG: &[ModelInfo] = &[
    ModelInfo {
        id: "deepseek/deepseek-chat-v3-0324:free",
        name: "deepseek-v3 (fast)",
        provider: Provider::OpenRouter,
    },
    ModelInfo {
        id: "deepseek/deepseek-r1:free",
        name: "deepseek-r1 (reasoning)",
        provider: Provider::OpenRouter,
    },
    ModelInfo {
        id: "gemini-2.0-flash-exp",
        name: "Gemini 2.0 flash (fast)",
        provider: Provider::Gemini,
    },
    ModelInfo {
        id: "gemini-2.0-flash-thinking-exp-1219",
        name: "Gemini 2.0 thinking",
        provider: Provider::Gemini,
    },
    ModelInfo {
        id: "gpt-4.1-mini",
        name: "GPT-4.1 mini (balanced)",
        provider: Provider::OpenAi,
    },
];

pub fn find_model(id: &str) -> Option<&'static ModelInfo> {
    CATALOG.iter().find(|m| m.id == id)
}

/// Fuzzy-filter the catalog, best match first. An empty filter keeps catalog order.
pub fn filter_models(filter: &str) -> Vec<&'static ModelInfo> {
    if filter.is_empty() {
        return CATALOG.iter().collect();
    }

    let matcher = SkimMatcherV2::default();
    let mut scored: Vec<_> = CATALOG
        .iter()
        .filter_map(|m| {
            let haystack = format!("{} {} {}", m.id, m.name, m.provider);
            matcher.fuzzy_match(&haystack, filter).map(|score| (m, score))
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.into_iter().map(|(m, _)| m).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_capabilities() {
        assert!(!Provider::OpenRouter.supports_images());
        assert!(Provider::OpenAi.supports_images());
        assert!(Provider::Gemini.supports_images());
        assert!(IMAGE_PROVIDER.supports_images());
    }

    #[test]
    fn test_default_model_per_provider() {
        assert_eq!(Provider::OpenAi.default_model(), "gpt-4.1-mini");
        assert_eq!(Provider::Gemini.default_model(), "gemini-2.0-flash-exp");
        assert_eq!(
            Provider::OpenRouter.default_model(),
            "deepseek/deepseek-chat-v3-0324:free"
        );
    }

    #[test]
    fn test_provider_parse_and_wire_name() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert!("anthropic".parse::<Provider>().is_err());
        assert_eq!(
            serde_json::to_string(&Provider::OpenRouter).unwrap(),
            "\"openrouter\""
        );
    }

    #[test]
    fn test_display_name() {
        let model = find_model("deepseek/deepseek-r1:free").unwrap();
        assert_eq!(model.display_name(), "deepseek-r1:free");
        assert_eq!(find_model("gpt-4.1-mini").unwrap().display_name(), "gpt-4.1-mini");
    }

    #[test]
    fn test_filter_models() {
        assert_eq!(filter_models("").len(), CATALOG.len());
        let hits = filter_models("gemini");
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|m| m.provider == Provider::Gemini));
    }
}
