//! Provider selection inputs
//!
//! Base URL, API key, organization ID and the abstract-to-concrete model mapping
//! are supplied by the settings collaborator and treated as opaque here.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::settings::Secret;

/// Supported upstream LLM providers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Azure,
    Anthropic,
    /// Any OpenAI-compatible endpoint
    Custom,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Azure => "azure",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Custom => "custom",
        }
    }

    /// Public endpoint for providers that have one
    pub fn default_url(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("https://api.openai.com"),
            ProviderKind::Anthropic => Some("https://api.anthropic.com"),
            ProviderKind::Azure | ProviderKind::Custom => None,
        }
    }

    fn default_model(&self, model: Model) -> Option<&'static str> {
        match (self, model) {
            (ProviderKind::OpenAi, Model::Base) => Some("gpt-4o-mini"),
            (ProviderKind::OpenAi, Model::Large) => Some("gpt-4o"),
            (ProviderKind::Anthropic, Model::Base) => Some("claude-3-5-haiku-latest"),
            (ProviderKind::Anthropic, Model::Large) => Some("claude-3-5-sonnet-latest"),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "azure" => Ok(ProviderKind::Azure),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "custom" => Ok(ProviderKind::Custom),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Abstract model tiers exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Base,
    Large,
}

impl FromStr for Model {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" => Ok(Model::Base),
            "large" => Ok(Model::Large),
            _ => Err(()),
        }
    }
}

/// Connection settings for the configured provider
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    #[serde(rename = "type", default)]
    pub kind: ProviderKind,

    /// Base URL override (required for Azure and custom providers)
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub api_key: Secret,

    #[serde(default)]
    pub organization_id: Option<String>,

    /// Abstract model -> concrete provider model (or Azure deployment)
    #[serde(default)]
    pub models: HashMap<Model, String>,

    /// Azure API version query parameter
    #[serde(default)]
    pub api_version: Option<String>,
}

impl ProviderSettings {
    /// Base URL without a trailing slash
    pub fn base_url(&self) -> String {
        self.url
            .as_deref()
            .or_else(|| self.kind.default_url())
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string()
    }

    /// Map a requested model name to the provider's concrete model.
    ///
    /// Abstract names go through the mapping table, then the provider default.
    /// Anything else is passed through untouched.
    pub fn resolve_model(&self, requested: &str) -> String {
        match requested.parse::<Model>() {
            Ok(model) => self
                .models
                .get(&model)
                .map(String::as_str)
                .or_else(|| self.kind.default_model(model))
                .unwrap_or(requested)
                .to_string(),
            Err(()) => requested.to_string(),
        }
    }
}
