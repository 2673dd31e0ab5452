//! Gateway settings
//!
//! The settings collaborator parses and validates plugin configuration before the
//! gateway starts. This module only describes the validated shape and offers two
//! ways to obtain it: JSON (plugin settings payload) and environment variables.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer};
use tracing::debug;
use zeroize::Zeroizing;

use crate::provider::{Model, ProviderKind, ProviderSettings};

/// Default token exchange endpoint used when none is configured
pub const DEFAULT_TOKEN_EXCHANGE_URL: &str = "https://token-exchange.grafana.net";

/// Default Grafana URL for local development
const DEFAULT_GRAFANA_URL: &str = "http://localhost:3000";

/// A secret string that is wiped from memory on drop and never printed
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Borrow the secret value
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "Secret([empty])")
        } else {
            write!(f, "Secret([REDACTED])")
        }
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Secret::new)
    }
}

/// Errors raised while loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{var} must be 'true' or 'false', got '{value}'")]
    InvalidBool { var: &'static str, value: String },

    #[error("{var}: unknown provider '{value}'")]
    InvalidProvider { var: &'static str, value: String },

    #[error("{0} is required when token exchange is enabled")]
    Missing(&'static str),
}

/// Validated gateway settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Grafana base URL used by the tool-calling API clients
    #[serde(default = "default_grafana_url")]
    pub grafana_url: String,

    /// Tenant (stack) identifier; tokens are scoped to `stack-<tenant>`
    #[serde(default)]
    pub tenant: String,

    /// Long-lived access-policy credential exchanged for short-lived tokens
    #[serde(default)]
    pub access_policy_token: Secret,

    /// Whether this deployment exchanges tokens at all
    #[serde(default)]
    pub require_token_exchange: bool,

    /// Token exchange endpoint
    #[serde(default = "default_exchange_url")]
    pub token_exchange_url: String,

    /// Static application credential (fallback when on-behalf-of is unavailable)
    #[serde(default)]
    pub service_account_token: Option<Secret>,

    /// Base URL of the incident service, if enabled
    #[serde(default)]
    pub incident_url: Option<String>,

    /// LLM provider selection
    #[serde(default)]
    pub provider: ProviderSettings,
}

fn default_grafana_url() -> String {
    DEFAULT_GRAFANA_URL.to_string()
}

fn default_exchange_url() -> String {
    DEFAULT_TOKEN_EXCHANGE_URL.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            grafana_url: default_grafana_url(),
            tenant: String::new(),
            access_policy_token: Secret::default(),
            require_token_exchange: false,
            token_exchange_url: default_exchange_url(),
            service_account_token: None,
            incident_url: None,
            provider: ProviderSettings::default(),
        }
    }
}

impl Settings {
    /// Parse settings from a JSON payload
    pub fn from_json(bytes: &[u8]) -> Result<Self, SettingsError> {
        let settings: Settings = serde_json::from_slice(bytes)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Build settings from `LLMGATE_*` environment variables
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (environment, test maps)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let require_token_exchange = match get("LLMGATE_REQUIRE_TOKEN_EXCHANGE") {
            Some(value) => parse_bool("LLMGATE_REQUIRE_TOKEN_EXCHANGE", &value)?,
            None => false,
        };

        let kind = match get("LLMGATE_PROVIDER") {
            Some(value) => {
                value
                    .parse::<ProviderKind>()
                    .map_err(|_| SettingsError::InvalidProvider {
                        var: "LLMGATE_PROVIDER",
                        value,
                    })?
            }
            None => ProviderKind::default(),
        };

        let mut models = HashMap::new();
        if let Some(base) = get("LLMGATE_MODEL_BASE") {
            models.insert(Model::Base, base);
        }
        if let Some(large) = get("LLMGATE_MODEL_LARGE") {
            models.insert(Model::Large, large);
        }

        let settings = Settings {
            grafana_url: get("LLMGATE_GRAFANA_URL").unwrap_or_else(default_grafana_url),
            tenant: get("LLMGATE_TENANT").unwrap_or_default(),
            access_policy_token: get("LLMGATE_ACCESS_POLICY_TOKEN")
                .map(Secret::new)
                .unwrap_or_default(),
            require_token_exchange,
            token_exchange_url: get("LLMGATE_TOKEN_EXCHANGE_URL")
                .unwrap_or_else(default_exchange_url),
            service_account_token: get("LLMGATE_SERVICE_ACCOUNT_TOKEN").map(Secret::new),
            incident_url: get("LLMGATE_INCIDENT_URL"),
            provider: ProviderSettings {
                kind,
                url: get("LLMGATE_PROVIDER_URL"),
                api_key: get("LLMGATE_PROVIDER_API_KEY")
                    .map(Secret::new)
                    .unwrap_or_default(),
                organization_id: get("LLMGATE_PROVIDER_ORG_ID"),
                models,
                api_version: get("LLMGATE_PROVIDER_API_VERSION"),
            },
        };

        settings.validate()?;
        debug!(
            provider = %settings.provider.kind,
            token_exchange = settings.token_exchange_enabled(),
            incident = settings.incident_url.is_some(),
            "Settings loaded from environment"
        );
        Ok(settings)
    }

    /// Exchange needs a tenant to scope the token to
    fn validate(&self) -> Result<(), SettingsError> {
        if self.require_token_exchange
            && !self.access_policy_token.is_empty()
            && self.tenant.is_empty()
        {
            return Err(SettingsError::Missing("tenant"));
        }
        Ok(())
    }

    /// Token exchange is effective only when required and a credential is present
    pub fn token_exchange_enabled(&self) -> bool {
        self.require_token_exchange && !self.access_policy_token.is_empty()
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(SettingsError::InvalidBool {
            var,
            value: value.to_string(),
        }),
    }
}
