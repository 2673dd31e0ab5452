//! Request-scoped call context and the decorator chain that builds it
//!
//! Decorators run in a fixed order:
//! 1. `CredentialsDecorator` - on-behalf-of (access token + ID token) when both
//!    headers are present, otherwise the static service-account credential
//! 2. `GrafanaClientDecorator` - API client for whichever credentials were chosen
//! 3. `IncidentClientDecorator` - secondary client; service-account credential only
//!
//! The stateless HTTP transport runs the chain on the inbound headers. The live
//! bridge runs the same chain after writing the session's current access token
//! into a copy of the publish headers, so both produce the same context for the
//! same caller.

use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use http::header::InvalidHeaderValue;
use http::{HeaderMap, HeaderValue};
use llmgate_core::{Secret, Settings};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Header carrying the exchanged access token
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// Header carrying the end-user identity token (correlation header)
pub const ID_TOKEN_HEADER: &str = "x-grafana-id";

/// Credentials selected for one call
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// End-user identity plus exchanged access token
    OnBehalfOf {
        access_token: String,
        id_token: String,
    },
    /// Statically configured application credential
    ServiceAccount { token: String },
    Anonymous,
}

impl Credentials {
    pub fn mode(&self) -> &'static str {
        match self {
            Credentials::OnBehalfOf { .. } => "on-behalf-of",
            Credentials::ServiceAccount { .. } => "service-account",
            Credentials::Anonymous => "anonymous",
        }
    }

    /// Attach the credential headers to an outgoing request
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Credentials::OnBehalfOf {
                access_token,
                id_token,
            } => request
                .header(ACCESS_TOKEN_HEADER, access_token)
                .header(ID_TOKEN_HEADER, id_token),
            Credentials::ServiceAccount { token } => request.bearer_auth(token),
            Credentials::Anonymous => request,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials({})", self.mode())
    }
}

/// Grafana HTTP API client bound to one credential set
#[derive(Clone)]
pub struct GrafanaClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl GrafanaClient {
    pub fn new(http: reqwest::Client, base_url: &str, credentials: Credentials) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// GET a JSON document from the Grafana API
    pub async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .credentials
            .apply(self.http.get(&url))
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("GET {} returned {}: {}", path, status, body.trim()));
        }

        response
            .json()
            .await
            .with_context(|| format!("GET {} returned invalid JSON", path))
    }
}

/// Incident service client. Only supports the service-account credential.
#[derive(Clone)]
pub struct IncidentClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl IncidentClient {
    pub fn new(http: reqwest::Client, base_url: &str, token: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST an RPC-style request and return the JSON body
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", path))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("POST {} returned {}: {}", path, status, body.trim()));
        }

        response
            .json()
            .await
            .with_context(|| format!("POST {} returned invalid JSON", path))
    }
}

/// Everything a protocol call needs to act for its caller
#[derive(Clone)]
pub struct CallContext {
    pub trace_id: String,
    pub credentials: Credentials,
    pub grafana: Option<GrafanaClient>,
    pub incident: Option<IncidentClient>,
    /// Cancellation of the request that carried this call
    pub cancel: CancellationToken,
}

impl CallContext {
    pub fn new(trace_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            trace_id: trace_id.into(),
            credentials: Credentials::Anonymous,
            grafana: None,
            incident: None,
            cancel,
        }
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("trace_id", &self.trace_id)
            .field("credentials", &self.credentials)
            .field("grafana", &self.grafana.as_ref().map(GrafanaClient::base_url))
            .field("incident", &self.incident.as_ref().map(IncidentClient::base_url))
            .finish()
    }
}

/// One step of context derivation
pub trait ContextDecorator: Send + Sync {
    fn name(&self) -> &'static str;

    fn decorate(&self, ctx: CallContext, headers: &HeaderMap) -> CallContext;
}

/// Copy of `headers` with any caller-supplied access token replaced by `token`.
/// An empty `token` only removes the header.
pub fn with_access_token(mut headers: HeaderMap, token: &str) -> Result<HeaderMap, InvalidHeaderValue> {
    headers.remove(ACCESS_TOKEN_HEADER);
    if !token.is_empty() {
        headers.insert(ACCESS_TOKEN_HEADER, HeaderValue::from_str(token)?);
    }
    Ok(headers)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Pick on-behalf-of credentials when both tokens are present
pub struct CredentialsDecorator {
    service_account_token: Option<Secret>,
}

impl CredentialsDecorator {
    pub fn new(service_account_token: Option<Secret>) -> Self {
        Self {
            service_account_token: service_account_token.filter(|t| !t.is_empty()),
        }
    }
}

impl ContextDecorator for CredentialsDecorator {
    fn name(&self) -> &'static str {
        "credentials"
    }

    fn decorate(&self, mut ctx: CallContext, headers: &HeaderMap) -> CallContext {
        let access_token = header_value(headers, ACCESS_TOKEN_HEADER);
        let id_token = header_value(headers, ID_TOKEN_HEADER);

        ctx.credentials = match (access_token, id_token, &self.service_account_token) {
            (Some(access_token), Some(id_token), _) => Credentials::OnBehalfOf {
                access_token: access_token.to_string(),
                id_token: id_token.to_string(),
            },
            (_, _, Some(token)) => Credentials::ServiceAccount {
                token: token.expose().to_string(),
            },
            _ => Credentials::Anonymous,
        };
        ctx
    }
}

/// Build the Grafana API client for the chosen credentials
pub struct GrafanaClientDecorator {
    http: reqwest::Client,
    base_url: String,
}

impl GrafanaClientDecorator {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

impl ContextDecorator for GrafanaClientDecorator {
    fn name(&self) -> &'static str {
        "grafana-client"
    }

    fn decorate(&self, mut ctx: CallContext, _headers: &HeaderMap) -> CallContext {
        ctx.grafana = Some(GrafanaClient::new(
            self.http.clone(),
            &self.base_url,
            ctx.credentials.clone(),
        ));
        ctx
    }
}

/// Build the incident client with the static credential.
///
/// Known limitation: the incident service cannot be called on behalf of a user.
/// On-behalf-of calls still get the service-account client when one is configured.
pub struct IncidentClientDecorator {
    http: reqwest::Client,
    base_url: Option<String>,
    service_account_token: Option<Secret>,
}

impl IncidentClientDecorator {
    pub fn new(
        http: reqwest::Client,
        base_url: Option<String>,
        service_account_token: Option<Secret>,
    ) -> Self {
        Self {
            http,
            base_url,
            service_account_token: service_account_token.filter(|t| !t.is_empty()),
        }
    }
}

impl ContextDecorator for IncidentClientDecorator {
    fn name(&self) -> &'static str {
        "incident-client"
    }

    fn decorate(&self, mut ctx: CallContext, _headers: &HeaderMap) -> CallContext {
        let Some(base_url) = &self.base_url else {
            return ctx;
        };

        match &self.service_account_token {
            Some(token) => {
                ctx.incident = Some(IncidentClient::new(self.http.clone(), base_url, token.expose()));
            }
            None => {
                debug!(
                    trace_id = %ctx.trace_id,
                    mode = ctx.credentials.mode(),
                    "Incident client skipped: requires a service account token"
                );
            }
        }
        ctx
    }
}

/// Ordered list of decorators
#[derive(Clone, Default)]
pub struct ContextChain {
    decorators: Vec<Arc<dyn ContextDecorator>>,
}

impl ContextChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, decorator: impl ContextDecorator + 'static) -> Self {
        self.decorators.push(Arc::new(decorator));
        self
    }

    /// Standard chain: credentials, Grafana client, incident client
    pub fn from_settings(settings: &Settings, http: reqwest::Client) -> Self {
        Self::new()
            .with(CredentialsDecorator::new(
                settings.service_account_token.clone(),
            ))
            .with(GrafanaClientDecorator::new(
                http.clone(),
                settings.grafana_url.clone(),
            ))
            .with(IncidentClientDecorator::new(
                http,
                settings.incident_url.clone(),
                settings.service_account_token.clone(),
            ))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.decorators.iter().map(|d| d.name()).collect()
    }

    /// Run every decorator in order
    pub fn apply(&self, ctx: CallContext, headers: &HeaderMap) -> CallContext {
        self.decorators
            .iter()
            .fold(ctx, |ctx, decorator| decorator.decorate(ctx, headers))
    }
}
