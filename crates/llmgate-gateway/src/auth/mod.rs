//! Credential Exchange
//!
//! Exchanges the long-lived access-policy credential for a short-lived access
//! token scoped to `stack-<tenant>` with audience `grafana`. Deployments that do
//! not use token exchange get a no-op client that always yields an empty token.
//!
//! No caching happens here: the live bridge keeps the current token per session
//! and decides when to ask for a new one.

mod token;

pub use token::{AccessToken, REFRESH_INTERVAL, TOKEN_TIMEOUT};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use llmgate_core::{Secret, Settings};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::ExchangeError;

/// Audience every exchanged token is issued for
pub const TOKEN_AUDIENCE: &str = "grafana";

/// Upper bound for one exchange round trip, independent of the caller's lifetime
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of short-lived access tokens.
///
/// Implementations must be cancel-safe: callers race `access_token()` against
/// their cancellation token and drop the future when it fires.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Mint a fresh access token
    async fn access_token(&self) -> Result<AccessToken, ExchangeError>;

    /// Whether this client performs a real exchange
    fn is_enabled(&self) -> bool;
}

/// Exchange client for deployments that do not need token exchange
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTokenExchange;

#[async_trait]
impl TokenExchange for NoopTokenExchange {
    async fn access_token(&self) -> Result<AccessToken, ExchangeError> {
        Ok(AccessToken::empty())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeRequest<'a> {
    namespace: &'a str,
    audiences: [&'a str; 1],
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    data: ExchangeData,
}

#[derive(Debug, Deserialize)]
struct ExchangeData {
    token: String,
}

/// Token exchange over HTTP
pub struct HttpTokenExchange {
    http: reqwest::Client,
    endpoint: Url,
    policy_token: Secret,
    namespace: String,
}

impl HttpTokenExchange {
    /// Build a client against `<exchange_url>/v1/sign-access-token`
    pub fn new(
        exchange_url: &str,
        policy_token: Secret,
        tenant: &str,
    ) -> Result<Self, ExchangeError> {
        let endpoint = format!("{}/v1/sign-access-token", exchange_url.trim_end_matches('/'));
        let endpoint = Url::parse(&endpoint).map_err(|e| ExchangeError::InvalidEndpoint {
            url: exchange_url.to_string(),
            reason: e.to_string(),
        })?;

        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ExchangeError::InvalidEndpoint {
                url: exchange_url.to_string(),
                reason: format!("unsupported scheme '{}'", endpoint.scheme()),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(EXCHANGE_TIMEOUT)
            .build()
            .map_err(ExchangeError::Client)?;

        Ok(Self {
            http,
            endpoint,
            policy_token,
            namespace: format!("stack-{}", tenant),
        })
    }

    /// Namespace the minted tokens are scoped to
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl TokenExchange for HttpTokenExchange {
    async fn access_token(&self) -> Result<AccessToken, ExchangeError> {
        debug!(namespace = %self.namespace, "Exchanging access policy token");

        let request = ExchangeRequest {
            namespace: &self.namespace,
            audiences: [TOKEN_AUDIENCE],
            expires_in: TOKEN_TIMEOUT.as_secs(),
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(self.policy_token.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExchangeError::Timeout(EXCHANGE_TIMEOUT)
                } else {
                    ExchangeError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ExchangeResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::Decode(e.to_string()))?;

        if parsed.data.token.is_empty() {
            return Err(ExchangeError::EmptyToken);
        }

        debug!(
            namespace = %self.namespace,
            token_len = parsed.data.token.len(),
            "Access token minted"
        );
        Ok(AccessToken::new(parsed.data.token))
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Create the exchange client for this deployment.
///
/// Returns the no-op client when exchange is not required or no policy token is
/// configured. Construction failure of the real client is fatal.
pub fn new_exchange_client(
    policy_token: &Secret,
    tenant: &str,
    requires_exchange: bool,
    exchange_url: &str,
) -> Result<Arc<dyn TokenExchange>, ExchangeError> {
    if !requires_exchange || policy_token.is_empty() {
        debug!("Token exchange disabled");
        return Ok(Arc::new(NoopTokenExchange));
    }

    let client = HttpTokenExchange::new(exchange_url, policy_token.clone(), tenant)?;
    info!(namespace = %client.namespace(), "Token exchange enabled");
    Ok(Arc::new(client))
}

/// Create the exchange client from gateway settings
pub fn exchange_client_from_settings(
    settings: &Settings,
) -> Result<Arc<dyn TokenExchange>, ExchangeError> {
    new_exchange_client(
        &settings.access_policy_token,
        &settings.tenant,
        settings.require_token_exchange,
        &settings.token_exchange_url,
    )
}
